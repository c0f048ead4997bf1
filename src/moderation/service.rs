/// Moderation service facade
///
/// Owns one instance of every component manager and implements the
/// pipelines that cross component boundaries: submission screening, intake
/// enqueueing and report resolution side effects.
use crate::{
    db::settle_savepoint,
    error::{ModResult, ModerationError},
    moderation::{
        catalog::FilterCatalog,
        content::ContentDirectory,
        flags::{Flag, FlagManager, FlagType},
        moderators::ModeratorRegistry,
        penalties::{self, NewPenalty, Penalty, PenaltyManager, PenaltyType},
        queue::{self, NewQueueItem, Priority, QueueItem, ReviewQueue},
        reports::{NewReport, Report, ReportCategory, ReportManager, Resolution},
        rules::{RuleManager, RuleScope},
        status::{self, visibility, ContentStatus, StatusManager, Viewer, Visibility},
        trust::{self, ComponentScores, TrustCounter, TrustEngine, TrustScore},
        types::{ContentKind, ContentRef, ModerationAction, UserId},
        verdicts::{FilterVerdict, VerdictManager},
        words::ProhibitedWordManager,
    },
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqlitePool};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Settings the service needs from configuration
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub bootstrap_admins: Vec<UserId>,
    pub default_suspension_days: i64,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            bootstrap_admins: Vec::new(),
            default_suspension_days: 7,
        }
    }
}

/// What is being screened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submission {
    /// A topic or comment body
    Content { target: ContentRef },
    /// A proposed username
    Username,
}

impl Submission {
    pub fn scope(&self) -> RuleScope {
        match self {
            Submission::Content { target } => match target.kind {
                ContentKind::Topic => RuleScope::Topic,
                ContentKind::Comment => RuleScope::Comment,
            },
            Submission::Username => RuleScope::Username,
        }
    }

    pub fn target(&self) -> Option<ContentRef> {
        match self {
            Submission::Content { target } => Some(*target),
            Submission::Username => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningDecision {
    /// Publish, using the cleaned text
    Allowed,
    /// Held pending human review
    Held,
    /// Blocked
    Rejected,
}

/// Result of screening a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningOutcome {
    pub decision: ScreeningDecision,
    pub cleaned_content: String,
    pub verdict: Option<FilterVerdict>,
    pub queue_item: Option<QueueItem>,
    pub penalty: Option<Penalty>,
}

/// Queue priority for a flag of the given type
pub fn flag_priority(flag_type: FlagType) -> Priority {
    let value = match flag_type {
        FlagType::HateSpeech | FlagType::ViolentContent | FlagType::IllegalContent => 5,
        FlagType::Harassment => 4,
        FlagType::Spam | FlagType::Misleading | FlagType::Inappropriate => 3,
        FlagType::OffTopic | FlagType::Other => 2,
    };
    Priority::clamped(value)
}

/// Queue priority for a report in the given category
pub fn report_priority(category: ReportCategory) -> Priority {
    let value = match category {
        ReportCategory::HateSpeech | ReportCategory::Violence | ReportCategory::IllegalContent => 5,
        ReportCategory::Harassment | ReportCategory::PrivacyViolation => 4,
        ReportCategory::Spam | ReportCategory::Misinformation | ReportCategory::Copyright => 3,
        ReportCategory::Other => 2,
    };
    Priority::clamped(value)
}

/// Facade over the moderation components
#[derive(Clone)]
pub struct ModerationService {
    pub registry: ModeratorRegistry,
    pub trust: TrustEngine,
    pub status: StatusManager,
    pub words: ProhibitedWordManager,
    pub rules: RuleManager,
    pub verdicts: VerdictManager,
    pub flags: FlagManager,
    pub reports: ReportManager,
    pub queue: ReviewQueue,
    pub penalties: PenaltyManager,
    catalog: Arc<FilterCatalog>,
    content: Arc<dyn ContentDirectory>,
    db: SqlitePool,
    default_suspension_days: i64,
}

impl ModerationService {
    pub fn new(db: SqlitePool, content: Arc<dyn ContentDirectory>, options: ServiceOptions) -> Self {
        let registry = ModeratorRegistry::new(db.clone()).with_bootstrap_admins(options.bootstrap_admins);
        let catalog = Arc::new(FilterCatalog::new(db.clone()));

        Self {
            trust: TrustEngine::new(db.clone()),
            status: StatusManager::new(db.clone(), registry.clone()),
            words: ProhibitedWordManager::new(db.clone(), catalog.clone(), registry.clone()),
            rules: RuleManager::new(db.clone(), catalog.clone(), registry.clone()),
            verdicts: VerdictManager::new(db.clone(), registry.clone()),
            flags: FlagManager::new(db.clone(), registry.clone(), content.clone()),
            reports: ReportManager::new(db.clone(), registry.clone(), content.clone()),
            queue: ReviewQueue::new(db.clone(), registry.clone()),
            penalties: PenaltyManager::new(db.clone(), registry.clone()),
            registry,
            catalog,
            content,
            db,
            default_suspension_days: options.default_suspension_days,
        }
    }

    pub fn catalog(&self) -> &FilterCatalog {
        &self.catalog
    }

    /// Run a core operation under a deadline
    pub async fn with_deadline<T, F>(deadline: Duration, operation: F) -> ModResult<T>
    where
        F: Future<Output = ModResult<T>>,
    {
        tokio::time::timeout(deadline, operation)
            .await
            .map_err(|_| ModerationError::Timeout)?
    }

    /// Screen submitted text and act on the verdict.
    ///
    /// Content can only be screened by its own author.
    pub async fn screen_submission(
        &self,
        author: UserId,
        submission: Submission,
        text: &str,
    ) -> ModResult<ScreeningOutcome> {
        let target = submission.target();
        if let Some(target) = target {
            match self.content.author_of(target).await? {
                None => {
                    return Err(ModerationError::NotFound(format!("Content {} not found", target)));
                }
                Some(owner) if owner != author => {
                    return Err(ModerationError::Unauthorized(format!(
                        "Only the author may submit {} for screening",
                        target
                    )));
                }
                Some(_) => {}
            }
        }
        let evaluation = self
            .rules
            .evaluate(author, text, submission.scope(), target.map(|t| t.id))
            .await?;

        let Some(evaluation) = evaluation else {
            let filtered = self.words.filter_text(text).await?;
            return Ok(ScreeningOutcome {
                decision: ScreeningDecision::Allowed,
                cleaned_content: filtered.cleaned,
                verdict: None,
                queue_item: None,
                penalty: None,
            });
        };

        let verdict = evaluation.verdict;
        let rule_names = evaluation.triggered_rule_names.join(", ");
        let mut outcome = ScreeningOutcome {
            decision: ScreeningDecision::Allowed,
            cleaned_content: verdict.cleaned_content.clone(),
            verdict: None,
            queue_item: None,
            penalty: None,
        };

        match verdict.action {
            ModerationAction::None | ModerationAction::Approve | ModerationAction::AutomaticFilter => {}
            ModerationAction::SendToQueue => {
                let Some(target) = target else {
                    debug!("Username from user {} matched a queue rule; rejecting", author);
                    outcome.decision = ScreeningDecision::Rejected;
                    outcome.verdict = Some(verdict);
                    return Ok(outcome);
                };

                let mut tx = self.db.begin().await?;
                status::ensure_pending_in(&mut tx, target, "Held for review by content filter").await?;
                let (item, _) = queue::add_in(
                    &mut tx,
                    &NewQueueItem {
                        target,
                        submitter_id: author,
                        reason: format!("Content filter: {}", rule_names),
                        filter_result_id: Some(verdict.id),
                        priority: Priority::from_severity(evaluation.top_severity),
                    },
                )
                .await?;
                tx.commit().await?;

                outcome.decision = ScreeningDecision::Held;
                outcome.queue_item = Some(item);
            }
            ModerationAction::Reject
            | ModerationAction::Warning
            | ModerationAction::TemporaryBan
            | ModerationAction::PermanentBan => {
                let mut tx = self.db.begin().await?;

                if let Some(target) = target {
                    let reason = format!("Rejected by content filter: {}", rule_names);
                    status::upsert_in(&mut tx, target, ContentStatus::Rejected, None, &reason, "").await?;
                }

                if let Some(penalty) = self.automatic_penalty(author, verdict.action, &rule_names, target) {
                    let mut savepoint = tx.begin().await?;
                    let applied = penalties::apply_automatic_in(&mut savepoint, penalty).await;
                    outcome.penalty = settle_savepoint(savepoint, applied, "Automatic penalty").await?;
                }

                tx.commit().await?;
                outcome.decision = ScreeningDecision::Rejected;
            }
        }

        info!(
            "Screened submission from user {}: {} ({:?})",
            author, verdict.action, outcome.decision
        );
        outcome.verdict = Some(verdict);
        Ok(outcome)
    }

    fn automatic_penalty(
        &self,
        author: UserId,
        action: ModerationAction,
        rule_names: &str,
        target: Option<ContentRef>,
    ) -> Option<NewPenalty> {
        let reason = format!("content filter rules {}", rule_names);
        let penalty = match action {
            ModerationAction::Warning => NewPenalty::new(author, PenaltyType::Warning, reason),
            ModerationAction::TemporaryBan => NewPenalty::new(author, PenaltyType::Suspension, reason)
                .with_duration(self.default_suspension_days),
            ModerationAction::PermanentBan => NewPenalty::new(author, PenaltyType::Ban, reason),
            _ => return None,
        };
        Some(match target {
            Some(target) => penalty.with_related_content(target),
            None => penalty,
        })
    }

    /// File a flag and queue the content for review
    pub async fn file_flag(
        &self,
        reporter: UserId,
        target: ContentRef,
        flag_type: FlagType,
        description: &str,
    ) -> ModResult<Flag> {
        let flag = self.flags.create(reporter, target, flag_type, description).await?;
        self.enqueue_reported(target, format!("Flag: {}", flag_type), flag_priority(flag_type))
            .await;
        Ok(flag)
    }

    /// File a report and queue the content for review
    pub async fn file_report(&self, reporter: UserId, new: NewReport) -> ModResult<Report> {
        let target = new.target;
        let category = new.category;
        let report = self.reports.create(reporter, new).await?;
        self.enqueue_reported(target, format!("Report: {}", category), report_priority(category))
            .await;
        Ok(report)
    }

    async fn enqueue_reported(&self, target: ContentRef, reason: String, priority: Priority) {
        let result: ModResult<()> = async {
            let Some(author) = self.content.author_of(target).await? else {
                warn!("No author known for {}; not queueing it", target);
                return Ok(());
            };

            let mut conn = self.db.acquire().await?;
            queue::add_in(
                &mut conn,
                &NewQueueItem {
                    target,
                    submitter_id: author,
                    reason,
                    filter_result_id: None,
                    priority,
                },
            )
            .await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to queue {} after intake: {}", target, e);
        }
    }

    /// Resolve a report and carry out the resolution against the content and its author
    pub async fn resolve_report(
        &self,
        caller: UserId,
        id: i64,
        resolution: Resolution,
        notes: &str,
    ) -> ModResult<Report> {
        let report = self.reports.resolve(caller, id, resolution, notes).await?;
        if resolution == Resolution::NoAction {
            return Ok(report);
        }

        if let Err(e) = self.apply_resolution(caller, &report, resolution, notes).await {
            warn!("Side effects of report {} resolution failed: {}", id, e);
        }
        Ok(report)
    }

    async fn apply_resolution(
        &self,
        caller: UserId,
        report: &Report,
        resolution: Resolution,
        notes: &str,
    ) -> ModResult<()> {
        let author = self.content.author_of(report.target).await?;
        let mut tx = self.db.begin().await?;

        if resolution == Resolution::ContentRemoved {
            let mut savepoint = tx.begin().await?;
            let reason = format!("Report {} resolved: content removed", report.id);
            let outcome = status::upsert_in(
                &mut savepoint,
                report.target,
                ContentStatus::Hidden,
                Some(caller),
                &reason,
                notes,
            )
            .await;
            settle_savepoint(savepoint, outcome, "Hiding reported content").await?;
        }

        let Some(author) = author else {
            warn!("No author known for {}; skipping user penalties", report.target);
            tx.commit().await?;
            return Ok(());
        };

        let reason = format!("Report {} resolved: {}", report.id, resolution);
        let penalty = match resolution {
            Resolution::Warning => Some(NewPenalty::new(author, PenaltyType::Warning, reason)),
            Resolution::UserSuspended => Some(
                NewPenalty::new(author, PenaltyType::Suspension, reason)
                    .with_duration(self.default_suspension_days),
            ),
            Resolution::UserBanned => Some(NewPenalty::new(author, PenaltyType::Ban, reason)),
            _ => None,
        };

        if let Some(penalty) = penalty {
            let mut savepoint = tx.begin().await?;
            let outcome = penalties::apply_in(
                &mut savepoint,
                Some(caller),
                &penalty.with_related_content(report.target),
            )
            .await;
            settle_savepoint(savepoint, outcome, "Penalty from report resolution").await?;
        }

        let mut savepoint = tx.begin().await?;
        let outcome = trust::record_in(&mut savepoint, author, TrustCounter::Report).await;
        settle_savepoint(savepoint, outcome, "Trust update after upheld report").await?;

        tx.commit().await?;
        Ok(())
    }

    /// Update a user's component scores (moderators only)
    pub async fn update_trust_scores(
        &self,
        caller: UserId,
        user_id: UserId,
        scores: ComponentScores,
    ) -> ModResult<TrustScore> {
        self.registry.require_moderator(caller).await?;
        let updated = self.trust.update_component_scores(user_id, scores).await?;
        info!("Trust components of user {} updated by {}", user_id, caller);
        Ok(updated)
    }

    /// How a content item should be presented to a viewer
    pub async fn visibility_for(&self, viewer: Option<UserId>, target: ContentRef) -> ModResult<Visibility> {
        let role = match viewer {
            None => Viewer::Public,
            Some(user) => {
                if self.registry.is_moderator(user).await? {
                    Viewer::Moderator
                } else if self.content.author_of(target).await? == Some(user) {
                    Viewer::Author
                } else {
                    Viewer::Public
                }
            }
        };
        let current = self.status.get(target).await?;
        Ok(visibility(current.as_ref(), role))
    }
}
