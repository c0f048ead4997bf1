/// Community moderation core
///
/// Content filtering, flag and report intake, moderation status, the review
/// queue, user trust, moderator privileges and penalties.
pub mod catalog;
pub mod content;
pub mod flags;
pub mod moderators;
pub mod penalties;
pub mod queue;
pub mod reports;
pub mod rules;
pub mod service;
pub mod status;
pub mod trust;
pub mod types;
pub mod verdicts;
pub mod words;

pub use content::{ContentDirectory, SqliteContentDirectory};
pub use flags::{Flag, FlagManager, FlagReview, FlagStatus, FlagType};
pub use moderators::{Capability, CapabilityUpdate, ModeratorCapabilities, ModeratorPrivilege, ModeratorRegistry};
pub use penalties::{NewPenalty, Penalty, PenaltyManager, PenaltyType, Restriction, UserActionKind};
pub use queue::{NewQueueItem, Priority, QueueDecision, QueueItem, QueueStats, QueueStatus, ReviewQueue};
pub use reports::{
    ActionLog, Evidence, NewEvidence, NewReport, Report, ReportCategory, ReportComment, ReportManager,
    ReportStats, ReportStatus, Resolution,
};
pub use rules::{NewRule, PatternType, Rule, RuleManager, RuleScope, RuleUpdate};
pub use service::{ModerationService, ScreeningDecision, ScreeningOutcome, ServiceOptions, Submission};
pub use status::{ContentStatus, ModerationStatus, StatusManager, Visibility};
pub use trust::{ComponentScores, TrustEngine, TrustLevel, TrustScore};
pub use types::{ContentKind, ContentRef, ModerationAction, UserId};
pub use verdicts::{FilterVerdict, VerdictManager};
pub use words::{FilterOutcome, NewProhibitedWord, ProhibitedWord, ProhibitedWordManager, WordUpdate};
