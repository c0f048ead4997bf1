/// Shared moderation vocabulary: content references and the action ordering
use crate::error::{ModResult, ModerationError};
use serde::{Deserialize, Serialize};

/// Numeric platform user id
pub type UserId = i64;

string_enum! {
    /// Kind of a moderatable content item
    pub enum ContentKind ("content type") {
        Topic => "topic",
        Comment => "comment",
    }
}

/// Reference to a content item owned by the forum service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub kind: ContentKind,
    pub id: i64,
}

impl ContentRef {
    pub fn new(kind: ContentKind, id: i64) -> ModResult<Self> {
        if id <= 0 {
            return Err(ModerationError::InvalidArgument(format!(
                "Content id must be positive, got {}",
                id
            )));
        }
        Ok(Self { kind, id })
    }

    pub fn topic(id: i64) -> ModResult<Self> {
        Self::new(ContentKind::Topic, id)
    }

    pub fn comment(id: i64) -> ModResult<Self> {
        Self::new(ContentKind::Comment, id)
    }

    /// Parse the wire pair `(content_type, content_id)`
    pub fn parse(kind: &str, id: i64) -> ModResult<Self> {
        Self::new(ContentKind::from_str(kind)?, id)
    }
}

impl std::fmt::Display for ContentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

string_enum! {
    /// Moderation outcomes, declared from least to most restrictive
    pub enum ModerationAction ("moderation action") {
        None => "none",
        Approve => "approve",
        SendToQueue => "send_to_queue",
        AutomaticFilter => "automatic_filter",
        Reject => "reject",
        Warning => "warning",
        TemporaryBan => "temporary_ban",
        PermanentBan => "permanent_ban",
    }
}

impl ModerationAction {
    /// Position in the restrictiveness order (higher = more restrictive)
    pub fn rank(&self) -> u8 {
        match self {
            ModerationAction::None => 0,
            ModerationAction::Approve => 1,
            ModerationAction::SendToQueue => 2,
            ModerationAction::AutomaticFilter => 3,
            ModerationAction::Reject => 4,
            ModerationAction::Warning => 5,
            ModerationAction::TemporaryBan => 6,
            ModerationAction::PermanentBan => 7,
        }
    }

    /// Get the more restrictive of two actions
    pub fn more_restrictive(self, other: ModerationAction) -> ModerationAction {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }

    /// Actions that keep the content out of public view
    pub fn blocks_content(&self) -> bool {
        self.rank() >= ModerationAction::Reject.rank()
    }
}

impl PartialOrd for ModerationAction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModerationAction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Validate a 1..=10 severity
pub fn validate_severity(severity: i64) -> ModResult<i64> {
    if !(1..=10).contains(&severity) {
        return Err(ModerationError::InvalidArgument(format!(
            "Severity must be between 1 and 10, got {}",
            severity
        )));
    }
    Ok(severity)
}

/// Reject empty or whitespace-only required text
pub fn require_text(field: &str, value: &str) -> ModResult<()> {
    if value.trim().is_empty() {
        return Err(ModerationError::InvalidArgument(format!("{} is required", field)));
    }
    Ok(())
}
