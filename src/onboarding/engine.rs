//! OnboardingEngine owns the public operations and the only code path that
//! mutates a progress aggregate.
//!
//! Every mutation is read-modify-write under a per-employee lock, and the
//! final save is compare-and-swap on the aggregate version. If another
//! process wrote in between, the operation is re-applied to the fresh record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::AuditSink;
use crate::content::{ContentCatalog, ContentProvider, QuestionView};
use crate::error::{DatabaseError, OnboardingError};
use crate::identity::IdentityService;
use crate::store::ProgressStore;

use super::gates::{self, Admission};
use super::handoff;
use super::machine::{self, StepView};
use super::model::{AuditAction, AuditEntry, NdaRecord, ProgressAggregate, QuizAttempt, VideoProgress};
use super::quiz::{self, Answers};
use super::step::OnboardingStep;

/// Default number of re-applications after a version conflict.
const DEFAULT_WRITE_RETRIES: u32 = 3;

/// Read model returned by most operations.
#[derive(Debug, Clone, Serialize)]
pub struct OnboardingOverview {
    pub progress: ProgressAggregate,
    pub steps: Vec<StepView>,
    pub attempts_remaining: u32,
    pub percent_complete: u32,
}

impl OnboardingOverview {
    fn build(progress: ProgressAggregate, catalog: &ContentCatalog) -> Self {
        Self {
            steps: machine::statuses(&progress, catalog),
            attempts_remaining: gates::attempts_remaining(&progress, &catalog.quiz),
            percent_complete: machine::percent_complete(&progress, catalog),
            progress,
        }
    }

    pub fn status(&self, step: OnboardingStep) -> Option<super::step::StepStatus> {
        self.steps.iter().find(|v| v.step == step).map(|v| v.status)
    }
}

/// Signature submission for the NDA step.
#[derive(Debug, Clone, Deserialize)]
pub struct NdaSubmission {
    pub signature_image: String,
    #[serde(default)]
    pub signer_name: Option<String>,
    /// UI signal that the agreement was scrolled to its end.
    pub scrolled_to_end: bool,
    #[serde(default)]
    pub pdf_reference: Option<String>,
}

/// Outcome of a quiz submission. Per-question results are never exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuizResult {
    pub attempt_number: u32,
    pub score: u32,
    pub passed: bool,
    pub attempts_remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeekResult {
    pub requested: f64,
    pub effective_position: f64,
    pub furthest_reached: f64,
}

/// Resume hint cached by the client (e.g. browser local storage).
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ClientVideoCache {
    #[serde(default)]
    pub last_position: f64,
    #[serde(default)]
    pub furthest_reached: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResumePoint {
    pub position: f64,
    pub furthest_reached: f64,
}

/// One row of the manager dashboard scan.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSummary {
    pub employee_id: String,
    pub employee_name: String,
    pub started_at: DateTime<Utc>,
    pub current_step: OnboardingStep,
    pub percent_complete: u32,
    pub video_percent_watched: u32,
    pub quiz_attempts: usize,
    /// Ready for the manager to hand over equipment.
    pub awaiting_handoff: bool,
    pub is_complete: bool,
}

/// What an operation did to the aggregate.
struct Change<T> {
    value: T,
    actions: Vec<AuditAction>,
    persist: bool,
}

impl<T> Change<T> {
    fn applied(value: T, action: AuditAction) -> Self {
        Self {
            value,
            actions: vec![action],
            persist: true,
        }
    }

    /// Persisted, but not worth an audit entry.
    fn quiet(value: T) -> Self {
        Self {
            value,
            actions: Vec::new(),
            persist: true,
        }
    }

    fn unchanged(value: T) -> Self {
        Self {
            value,
            actions: Vec::new(),
            persist: false,
        }
    }

    fn admitted(admission: Admission, value: T, action: AuditAction) -> Self {
        match admission {
            Admission::Proceed => Self::applied(value, action),
            Admission::AlreadyDone => Self::unchanged(value),
        }
    }
}

struct Applied<T> {
    value: T,
    progress: ProgressAggregate,
    catalog: Arc<ContentCatalog>,
    changed: bool,
}

impl<T> Applied<T> {
    fn overview(self) -> OnboardingOverview {
        OnboardingOverview::build(self.progress, &self.catalog)
    }
}

fn check_position(name: &str, value: f64) -> Result<f64, OnboardingError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(OnboardingError::InvalidInput(format!(
            "{name} must be a non-negative number, got {value}"
        )))
    }
}

/// Coordinates gates, the step machine and the handoff protocol over
/// persisted progress.
pub struct OnboardingEngine {
    store: Arc<dyn ProgressStore>,
    content: Arc<dyn ContentProvider>,
    identity: Arc<dyn IdentityService>,
    audit: Arc<dyn AuditSink>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    write_retries: u32,
}

impl OnboardingEngine {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        content: Arc<dyn ContentProvider>,
        identity: Arc<dyn IdentityService>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            content,
            identity,
            audit,
            locks: Mutex::new(HashMap::new()),
            write_retries: DEFAULT_WRITE_RETRIES,
        }
    }

    pub fn with_write_retries(mut self, retries: u32) -> Self {
        self.write_retries = retries;
        self
    }

    async fn lock_for(&self, employee_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(employee_id.to_string()).or_default())
    }

    /// Hand back a lock from `lock_for`; the entry goes once nobody holds or awaits it.
    async fn release(&self, employee_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks
            .get(employee_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(employee_id);
        }
    }

    async fn load(&self, employee_id: &str) -> Result<ProgressAggregate, OnboardingError> {
        self.store
            .get(employee_id)
            .await?
            .ok_or_else(|| OnboardingError::RecordNotFound {
                employee_id: employee_id.to_string(),
            })
    }

    async fn require_manager(&self, actor: &str, operation: &str) -> Result<(), OnboardingError> {
        if self.identity.is_manager(actor).await {
            Ok(())
        } else {
            warn!(actor = %actor, operation, "Manager-only operation refused");
            Err(OnboardingError::Unauthorized {
                actor: actor.to_string(),
                operation: operation.to_string(),
            })
        }
    }

    /// Load, apply `op`, and save with a version check, re-applying on conflict.
    async fn mutate<T, F>(
        &self,
        employee_id: &str,
        actor: &str,
        op: F,
    ) -> Result<Applied<T>, OnboardingError>
    where
        T: Send,
        F: Fn(&mut ProgressAggregate, &ContentCatalog) -> Result<Change<T>, OnboardingError>
            + Send
            + Sync,
    {
        let lock = self.lock_for(employee_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.mutate_locked(employee_id, actor, op).await
        };
        self.release(employee_id, lock).await;
        result
    }

    async fn mutate_locked<T, F>(
        &self,
        employee_id: &str,
        actor: &str,
        op: F,
    ) -> Result<Applied<T>, OnboardingError>
    where
        T: Send,
        F: Fn(&mut ProgressAggregate, &ContentCatalog) -> Result<Change<T>, OnboardingError>
            + Send
            + Sync,
    {
        let mut attempt = 0;
        loop {
            let catalog = self.content.catalog().await;
            let mut progress = self.load(employee_id).await?;
            let expected = progress.version;

            let change = match op(&mut progress, &catalog) {
                Ok(change) => change,
                Err(e) => {
                    debug!(employee_id = %employee_id, error = %e, "Operation refused");
                    return Err(e);
                }
            };

            if !change.persist {
                return Ok(Applied {
                    value: change.value,
                    progress,
                    catalog,
                    changed: false,
                });
            }

            progress.version = expected + 1;
            progress.updated_at = Utc::now();
            let entries: Vec<AuditEntry> = change
                .actions
                .into_iter()
                .map(|action| progress.record(actor, action))
                .collect();

            match self.store.save(&progress, expected).await {
                Ok(()) => {
                    for entry in &entries {
                        self.audit.record(employee_id, entry).await;
                    }
                    return Ok(Applied {
                        value: change.value,
                        progress,
                        catalog,
                        changed: true,
                    });
                }
                Err(DatabaseError::VersionConflict { found, .. }) if attempt < self.write_retries => {
                    attempt += 1;
                    warn!(
                        employee_id = %employee_id,
                        expected,
                        found = ?found,
                        attempt,
                        "Concurrent update detected, re-applying"
                    );
                }
                Err(DatabaseError::VersionConflict { .. }) => {
                    return Err(OnboardingError::Conflict {
                        employee_id: employee_id.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Employees may act on their own record; managers on anyone's.
    pub async fn authorize(
        &self,
        employee_id: &str,
        actor: &str,
        operation: &str,
    ) -> Result<(), OnboardingError> {
        if actor == employee_id {
            return Ok(());
        }
        self.require_manager(actor, operation).await
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Get or create the aggregate. Callable by the employee or a manager.
    pub async fn initialize(
        &self,
        employee_id: &str,
        employee_name: &str,
        actor: &str,
    ) -> Result<OnboardingOverview, OnboardingError> {
        if employee_id.trim().is_empty() {
            return Err(OnboardingError::InvalidInput("employee id is required".into()));
        }
        self.authorize(employee_id, actor, "initialize onboarding").await?;

        let lock = self.lock_for(employee_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.initialize_locked(employee_id, employee_name, actor).await
        };
        self.release(employee_id, lock).await;
        result
    }

    async fn initialize_locked(
        &self,
        employee_id: &str,
        employee_name: &str,
        actor: &str,
    ) -> Result<OnboardingOverview, OnboardingError> {
        let catalog = self.content.catalog().await;

        if let Some(existing) = self.store.get(employee_id).await? {
            return Ok(OnboardingOverview::build(existing, &catalog));
        }

        let mut progress = ProgressAggregate::new(employee_id, employee_name);
        progress.version = 1;
        let entry = progress.record(actor, AuditAction::Initialized);
        match self.store.insert(&progress).await {
            Ok(()) => {
                info!(employee_id = %employee_id, actor = %actor, "Onboarding initialized");
                self.audit.record(employee_id, &entry).await;
                Ok(OnboardingOverview::build(progress, &catalog))
            }
            Err(DatabaseError::AlreadyExists(_)) => {
                let existing = self.load(employee_id).await?;
                Ok(OnboardingOverview::build(existing, &catalog))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Full restart. Destructive: attempts and the audit log are discarded.
    pub async fn reset(
        &self,
        employee_id: &str,
        manager_id: &str,
    ) -> Result<OnboardingOverview, OnboardingError> {
        self.require_manager(manager_id, "reset onboarding").await?;
        let applied = self
            .mutate(employee_id, manager_id, |p, _| {
                let fresh = ProgressAggregate::new(p.employee_id.clone(), p.employee_name.clone());
                *p = fresh;
                Ok(Change::applied((), AuditAction::Reset))
            })
            .await?;
        warn!(employee_id = %employee_id, manager = %manager_id, "Onboarding progress reset");
        Ok(applied.overview())
    }

    // ── Read model ──────────────────────────────────────────────────

    pub async fn overview(&self, employee_id: &str) -> Result<OnboardingOverview, OnboardingError> {
        let progress = self.load(employee_id).await?;
        let catalog = self.content.catalog().await;
        Ok(OnboardingOverview::build(progress, &catalog))
    }

    pub async fn attempts_remaining(&self, employee_id: &str) -> Result<u32, OnboardingError> {
        let progress = self.load(employee_id).await?;
        let catalog = self.content.catalog().await;
        Ok(gates::attempts_remaining(&progress, &catalog.quiz))
    }

    /// Quiz questions without answers.
    pub async fn quiz_questions(&self) -> Vec<QuestionView> {
        self.content.catalog().await.quiz.public_questions()
    }

    /// Read-only scan for the manager dashboard.
    pub async fn list_progress(&self, actor: &str) -> Result<Vec<ProgressSummary>, OnboardingError> {
        self.require_manager(actor, "list onboarding progress").await?;
        let catalog = self.content.catalog().await;
        let summaries = self
            .store
            .list()
            .await?
            .into_iter()
            .map(|p| ProgressSummary {
                awaiting_handoff: !p.handoff_marked()
                    && machine::require_unlocked(&p, &catalog, OnboardingStep::Handoff).is_ok(),
                percent_complete: machine::percent_complete(&p, &catalog),
                video_percent_watched: p.video.as_ref().map_or(0, |v| v.percent_watched()),
                quiz_attempts: p.quiz_attempts.len(),
                employee_id: p.employee_id,
                employee_name: p.employee_name,
                started_at: p.started_at,
                current_step: p.current_step,
                is_complete: p.is_complete,
            })
            .collect();
        Ok(summaries)
    }

    // ── Navigation ──────────────────────────────────────────────────

    /// Move to any step that is not locked.
    pub async fn go_to_step(
        &self,
        employee_id: &str,
        target: OnboardingStep,
    ) -> Result<OnboardingOverview, OnboardingError> {
        let applied = self
            .mutate(employee_id, employee_id, |p, catalog| {
                machine::check_navigation(p, catalog, target)?;
                if p.current_step == target {
                    return Ok(Change::unchanged(()));
                }
                let from = p.current_step;
                p.current_step = target;
                Ok(Change::applied((), AuditAction::Navigated { from, to: target }))
            })
            .await?;
        if applied.changed {
            info!(employee_id = %employee_id, step = %target, "Step changed");
        }
        Ok(applied.overview())
    }

    /// Move to the step after the current one.
    pub async fn advance(&self, employee_id: &str) -> Result<OnboardingOverview, OnboardingError> {
        let applied = self
            .mutate(employee_id, employee_id, |p, catalog| {
                let from = p.current_step;
                let to = from
                    .next()
                    .ok_or(OnboardingError::InvalidTransition { from, to: from })?;
                machine::check_navigation(p, catalog, to)?;
                p.current_step = to;
                Ok(Change::applied(to, AuditAction::Navigated { from, to }))
            })
            .await?;
        info!(employee_id = %employee_id, step = %applied.value, "Step changed");
        Ok(applied.overview())
    }

    // ── NDA ─────────────────────────────────────────────────────────

    pub async fn sign_nda(
        &self,
        employee_id: &str,
        submission: NdaSubmission,
    ) -> Result<OnboardingOverview, OnboardingError> {
        let applied = self
            .mutate(employee_id, employee_id, |p, _| {
                gates::nda_gate(p, submission.scrolled_to_end)?;
                if submission.signature_image.trim().is_empty() {
                    return Err(OnboardingError::InvalidInput("signature is required".into()));
                }
                let signed_by_name = submission
                    .signer_name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| p.employee_name.clone());
                p.nda = Some(NdaRecord {
                    signature_image: submission.signature_image.clone(),
                    signed_by: p.employee_id.clone(),
                    signed_by_name,
                    signed_at: Utc::now(),
                    pdf_reference: submission.pdf_reference.clone(),
                });
                Ok(Change::applied((), AuditAction::NdaSigned))
            })
            .await?;
        info!(employee_id = %employee_id, "NDA signed");
        Ok(applied.overview())
    }

    // ── Documents ───────────────────────────────────────────────────

    pub async fn open_document(
        &self,
        employee_id: &str,
        document_id: &str,
    ) -> Result<OnboardingOverview, OnboardingError> {
        let applied = self
            .mutate(employee_id, employee_id, |p, catalog| {
                machine::require_unlocked(p, catalog, OnboardingStep::Documents)?;
                known_document(catalog, document_id)?;
                let entry = p.document_mut(document_id);
                if entry.started {
                    return Ok(Change::unchanged(()));
                }
                entry.started = true;
                Ok(Change::applied(
                    (),
                    AuditAction::DocumentOpened {
                        document_id: document_id.to_string(),
                    },
                ))
            })
            .await?;
        Ok(applied.overview())
    }

    /// Record the UI's scroll-to-end signal for a document.
    pub async fn mark_document_scrolled(
        &self,
        employee_id: &str,
        document_id: &str,
    ) -> Result<OnboardingOverview, OnboardingError> {
        let applied = self
            .mutate(employee_id, employee_id, |p, catalog| {
                machine::require_unlocked(p, catalog, OnboardingStep::Documents)?;
                known_document(catalog, document_id)?;
                let entry = p.document_mut(document_id);
                if entry.scrolled_to_end {
                    return Ok(Change::unchanged(()));
                }
                entry.started = true;
                entry.scrolled_to_end = true;
                Ok(Change::applied(
                    (),
                    AuditAction::DocumentScrolled {
                        document_id: document_id.to_string(),
                    },
                ))
            })
            .await?;
        Ok(applied.overview())
    }

    /// Add reading time. Deltas are additive; negative deltas are rejected.
    pub async fn record_reading_time(
        &self,
        employee_id: &str,
        document_id: &str,
        delta_seconds: i64,
    ) -> Result<OnboardingOverview, OnboardingError> {
        let delta = u64::try_from(delta_seconds).map_err(|_| {
            OnboardingError::InvalidInput(format!(
                "reading time delta must not be negative, got {delta_seconds}"
            ))
        })?;
        let applied = self
            .mutate(employee_id, employee_id, |p, catalog| {
                machine::require_unlocked(p, catalog, OnboardingStep::Documents)?;
                known_document(catalog, document_id)?;
                if delta == 0 {
                    return Ok(Change::unchanged(()));
                }
                let entry = p.document_mut(document_id);
                entry.started = true;
                entry.time_spent_seconds = entry.time_spent_seconds.saturating_add(delta);
                Ok(Change::applied(
                    (),
                    AuditAction::ReadingTimeRecorded {
                        document_id: document_id.to_string(),
                        delta_seconds: delta,
                    },
                ))
            })
            .await?;
        Ok(applied.overview())
    }

    /// Confirm a document as read. Retrying after success is a no-op.
    pub async fn confirm_document(
        &self,
        employee_id: &str,
        document_id: &str,
    ) -> Result<OnboardingOverview, OnboardingError> {
        let applied = self
            .mutate(employee_id, employee_id, |p, catalog| {
                machine::require_unlocked(p, catalog, OnboardingStep::Documents)?;
                let document = known_document(catalog, document_id)?;
                let admission = gates::document_gate(p, document)?;
                if admission == Admission::Proceed {
                    let entry = p.document_mut(document_id);
                    entry.confirmed = true;
                    entry.confirmed_at = Some(Utc::now());
                }
                Ok(Change::admitted(
                    admission,
                    (),
                    AuditAction::DocumentConfirmed {
                        document_id: document_id.to_string(),
                    },
                ))
            })
            .await?;
        if applied.changed {
            info!(employee_id = %employee_id, document_id = %document_id, "Document confirmed");
        }
        Ok(applied.overview())
    }

    // ── Video ───────────────────────────────────────────────────────

    /// Record a playback position. `furthest_reached` only ever grows.
    pub async fn report_video_progress(
        &self,
        employee_id: &str,
        position: f64,
        duration: f64,
    ) -> Result<OnboardingOverview, OnboardingError> {
        let position = check_position("position", position)?;
        let applied = self
            .mutate(employee_id, employee_id, |p, catalog| {
                machine::require_unlocked(p, catalog, OnboardingStep::Video)?;
                let mut video = match p.video.take() {
                    Some(video) => video,
                    None => VideoProgress::new(video_duration(catalog, Some(duration))?),
                };
                let before = video.clone();
                video.report(position);
                let change = if video == before {
                    Change::unchanged(())
                } else if video.furthest_reached > before.furthest_reached {
                    Change::applied(
                        (),
                        AuditAction::VideoProgress {
                            position: video.last_position,
                            furthest_reached: video.furthest_reached,
                        },
                    )
                } else {
                    Change::quiet(())
                };
                p.video = Some(video);
                Ok(change)
            })
            .await?;
        Ok(applied.overview())
    }

    /// Seek, clamped to content already watched.
    pub async fn request_seek(
        &self,
        employee_id: &str,
        target: f64,
    ) -> Result<SeekResult, OnboardingError> {
        let target = check_position("seek target", target)?;
        let applied = self
            .mutate(employee_id, employee_id, |p, catalog| {
                machine::require_unlocked(p, catalog, OnboardingStep::Video)?;
                let Some(video) = p.video.as_mut() else {
                    return Ok(Change::unchanged(SeekResult {
                        requested: target,
                        effective_position: 0.0,
                        furthest_reached: 0.0,
                    }));
                };
                let effective = video.clamp_seek(target);
                let result = SeekResult {
                    requested: target,
                    effective_position: effective,
                    furthest_reached: video.furthest_reached,
                };
                if video.last_position == effective {
                    return Ok(Change::unchanged(result));
                }
                video.last_position = effective;
                if effective < target {
                    Ok(Change::applied(
                        result,
                        AuditAction::VideoSeek {
                            requested: target,
                            effective,
                        },
                    ))
                } else {
                    Ok(Change::quiet(result))
                }
            })
            .await?;
        if applied.value.effective_position < target {
            debug!(
                employee_id = %employee_id,
                requested = target,
                effective = applied.value.effective_position,
                "Seek clamped to furthest watched position"
            );
        }
        Ok(applied.value)
    }

    /// Playback reached the natural end of the video.
    pub async fn mark_video_ended(
        &self,
        employee_id: &str,
    ) -> Result<OnboardingOverview, OnboardingError> {
        let applied = self
            .mutate(employee_id, employee_id, |p, catalog| {
                machine::require_unlocked(p, catalog, OnboardingStep::Video)?;
                if p.video.as_ref().is_some_and(|v| v.completed) {
                    return Ok(Change::unchanged(()));
                }
                let mut video = match p.video.take() {
                    Some(video) => video,
                    None => VideoProgress::new(video_duration(catalog, None)?),
                };
                video.mark_ended();
                p.video = Some(video);
                Ok(Change::applied((), AuditAction::VideoEnded))
            })
            .await?;
        if applied.changed {
            info!(employee_id = %employee_id, "Training video completed");
        }
        Ok(applied.overview())
    }

    /// Where playback should resume, reconciling a client-side cache.
    ///
    /// Takes the later of the two last positions but never lands beyond the
    /// server's furthest-reached point. The cache cannot raise that point.
    pub async fn resume_position(
        &self,
        employee_id: &str,
        cache: Option<ClientVideoCache>,
    ) -> Result<ResumePoint, OnboardingError> {
        let progress = self.load(employee_id).await?;
        let Some(video) = progress.video else {
            return Ok(ResumePoint {
                position: 0.0,
                furthest_reached: 0.0,
            });
        };
        let cached = cache
            .map(|c| c.last_position)
            .filter(|p| p.is_finite())
            .unwrap_or(0.0);
        Ok(ResumePoint {
            position: video.clamp_seek(video.last_position.max(cached)),
            furthest_reached: video.furthest_reached,
        })
    }

    // ── Quiz ────────────────────────────────────────────────────────

    pub async fn submit_quiz(
        &self,
        employee_id: &str,
        answers: Answers,
    ) -> Result<QuizResult, OnboardingError> {
        let applied = self
            .mutate(employee_id, employee_id, |p, catalog| {
                gates::quiz_gate(p, &catalog.quiz)?;
                machine::require_unlocked(p, catalog, OnboardingStep::Quiz)?;

                let grade = quiz::grade(&catalog.quiz, &answers);
                let attempt_number = p.quiz_attempts.len() as u32 + 1;
                p.quiz_attempts.append(QuizAttempt {
                    attempt_number,
                    score: grade.score,
                    passed: grade.passed,
                    submitted_at: Utc::now(),
                });
                let result = QuizResult {
                    attempt_number,
                    score: grade.score,
                    passed: grade.passed,
                    attempts_remaining: gates::attempts_remaining(p, &catalog.quiz),
                };
                Ok(Change::applied(
                    result,
                    AuditAction::QuizSubmitted {
                        attempt_number,
                        score: grade.score,
                        passed: grade.passed,
                    },
                ))
            })
            .await?;

        let result = applied.value;
        info!(
            employee_id = %employee_id,
            attempt = result.attempt_number,
            score = result.score,
            passed = result.passed,
            remaining = result.attempts_remaining,
            "Quiz attempt graded"
        );
        if !result.passed && result.attempts_remaining == 0 {
            warn!(employee_id = %employee_id, "Quiz attempts exhausted, review required");
        }
        Ok(result)
    }

    // ── Notification ────────────────────────────────────────────────

    /// Acknowledge the post-quiz notification and move on to the handoff.
    pub async fn acknowledge_notification(
        &self,
        employee_id: &str,
    ) -> Result<OnboardingOverview, OnboardingError> {
        let applied = self
            .mutate(employee_id, employee_id, |p, catalog| {
                machine::require_unlocked(p, catalog, OnboardingStep::Notification)?;
                if p.notification_acknowledged_at.is_some() {
                    return Ok(Change::unchanged(()));
                }
                p.notification_acknowledged_at = Some(Utc::now());
                p.current_step = OnboardingStep::Handoff;
                Ok(Change::applied((), AuditAction::NotificationAcknowledged))
            })
            .await?;
        Ok(applied.overview())
    }

    // ── Handoff ─────────────────────────────────────────────────────

    /// Manager marks the physical handoff. Repeating it is a no-op.
    pub async fn manager_mark_handoff(
        &self,
        employee_id: &str,
        manager_id: &str,
        signature: &str,
    ) -> Result<OnboardingOverview, OnboardingError> {
        self.require_manager(manager_id, "mark equipment handoff").await?;
        let applied = self
            .mutate(employee_id, manager_id, |p, catalog| {
                let admission = handoff::mark(p, catalog, manager_id, signature, Utc::now())?;
                Ok(Change::admitted(admission, (), AuditAction::HandoffMarked))
            })
            .await?;
        if applied.changed {
            info!(employee_id = %employee_id, manager = %manager_id, "Handoff marked");
        }
        Ok(applied.overview())
    }

    /// Employee confirms receipt. Repeating it is a no-op.
    pub async fn employee_confirm_handoff(
        &self,
        employee_id: &str,
        actor: &str,
    ) -> Result<OnboardingOverview, OnboardingError> {
        if actor != employee_id {
            return Err(OnboardingError::Unauthorized {
                actor: actor.to_string(),
                operation: "confirm handoff for another employee".into(),
            });
        }
        let applied = self
            .mutate(employee_id, actor, |p, _| {
                let admission = handoff::confirm(p, Utc::now())?;
                Ok(Change::admitted(admission, (), AuditAction::HandoffConfirmed))
            })
            .await?;
        if applied.changed {
            info!(employee_id = %employee_id, "Handoff confirmed");
        }
        Ok(applied.overview())
    }

    /// Terminal transition. Notifies the identity system exactly once.
    pub async fn complete_onboarding(
        &self,
        employee_id: &str,
        actor: &str,
    ) -> Result<OnboardingOverview, OnboardingError> {
        let applied = self
            .mutate(employee_id, actor, |p, catalog| {
                let admission = handoff::complete(p, catalog, Utc::now())?;
                Ok(Change::admitted(admission, (), AuditAction::Completed))
            })
            .await?;

        if applied.changed {
            info!(employee_id = %employee_id, "Onboarding complete");
            if let Err(e) = self.identity.mark_onboarded(employee_id).await {
                tracing::error!(
                    employee_id = %employee_id,
                    error = %e,
                    "Failed to clear new-employee flag"
                );
            }
        }
        Ok(applied.overview())
    }
}

fn known_document<'a>(
    catalog: &'a ContentCatalog,
    document_id: &str,
) -> Result<&'a crate::content::ReadingDocument, OnboardingError> {
    catalog
        .document(document_id)
        .ok_or_else(|| OnboardingError::UnknownDocument(document_id.to_string()))
}

/// Configured duration wins; otherwise the player-reported one.
fn video_duration(catalog: &ContentCatalog, reported: Option<f64>) -> Result<f64, OnboardingError> {
    if let Some(d) = catalog.video.duration_seconds {
        return Ok(d);
    }
    match reported {
        Some(d) if d.is_finite() && d > 0.0 => Ok(d),
        Some(d) => Err(OnboardingError::InvalidInput(format!(
            "duration must be positive, got {d}"
        ))),
        None => Err(OnboardingError::InvalidInput(
            "video duration unknown; report playback progress first".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::content::{ReadingDocument, StaticContent, fixtures};
    use crate::error::GateFailure;
    use crate::identity::{IdentityError, StaticIdentity};
    use crate::onboarding::quiz::fixtures::answers_with_wrong;
    use crate::onboarding::step::StepStatus;
    use crate::store::MemoryProgressStore;

    const EMP: &str = "emp-1";
    const MGR: &str = "mgr-1";

    struct Harness {
        engine: Arc<OnboardingEngine>,
        content: Arc<StaticContent>,
        identity: Arc<StaticIdentity>,
        audit: Arc<MemoryAuditSink>,
    }

    fn harness_with_store(store: Arc<dyn ProgressStore>) -> Harness {
        let content = Arc::new(StaticContent::new(fixtures::catalog()));
        let identity = Arc::new(StaticIdentity::new(vec![MGR.to_string()]));
        let audit = Arc::new(MemoryAuditSink::new());
        let engine = Arc::new(OnboardingEngine::new(
            store,
            content.clone(),
            identity.clone(),
            audit.clone(),
        ));
        Harness {
            engine,
            content,
            identity,
            audit,
        }
    }

    async fn harness() -> Harness {
        let h = harness_with_store(Arc::new(MemoryProgressStore::new()));
        h.engine.initialize(EMP, "Alice", MGR).await.unwrap();
        h
    }

    fn nda(scrolled: bool) -> NdaSubmission {
        NdaSubmission {
            signature_image: "data:image/png;base64,iVBOR".into(),
            signer_name: None,
            scrolled_to_end: scrolled,
            pdf_reference: None,
        }
    }

    async fn read_all_documents(engine: &OnboardingEngine) {
        for (id, secs) in [("handbook", 120), ("safety", 60)] {
            engine.open_document(EMP, id).await.unwrap();
            engine.mark_document_scrolled(EMP, id).await.unwrap();
            engine.record_reading_time(EMP, id, secs).await.unwrap();
            engine.confirm_document(EMP, id).await.unwrap();
        }
    }

    async fn ready_for_quiz(engine: &OnboardingEngine) {
        engine.sign_nda(EMP, nda(true)).await.unwrap();
        engine.advance(EMP).await.unwrap();
        read_all_documents(engine).await;
        engine.advance(EMP).await.unwrap();
        engine.report_video_progress(EMP, 300.0, 600.0).await.unwrap();
        engine.mark_video_ended(EMP).await.unwrap();
        engine.advance(EMP).await.unwrap();
    }

    async fn ready_for_handoff(engine: &OnboardingEngine) {
        ready_for_quiz(engine).await;
        assert!(engine.submit_quiz(EMP, answers_with_wrong(0)).await.unwrap().passed);
        engine.advance(EMP).await.unwrap();
        engine.acknowledge_notification(EMP).await.unwrap();
    }

    #[tokio::test]
    async fn end_to_end_onboarding() {
        let h = harness().await;
        h.engine.sign_nda(EMP, nda(true)).await.unwrap();
        read_all_documents(&h.engine).await;
        h.engine.report_video_progress(EMP, 600.0, 600.0).await.unwrap();
        h.engine.mark_video_ended(EMP).await.unwrap();

        let first = h.engine.submit_quiz(EMP, answers_with_wrong(4)).await.unwrap();
        assert_eq!(
            first,
            QuizResult {
                attempt_number: 1,
                score: 60,
                passed: false,
                attempts_remaining: 2,
            }
        );
        let second = h.engine.submit_quiz(EMP, answers_with_wrong(1)).await.unwrap();
        assert_eq!(second.score, 90);
        assert!(second.passed);

        h.engine.acknowledge_notification(EMP).await.unwrap();
        h.engine.manager_mark_handoff(EMP, MGR, "M. Gr").await.unwrap();
        h.engine.employee_confirm_handoff(EMP, EMP).await.unwrap();
        let view = h.engine.complete_onboarding(EMP, EMP).await.unwrap();

        assert!(view.progress.is_complete);
        assert_eq!(view.status(OnboardingStep::Complete), Some(StepStatus::Completed));
        assert_eq!(view.percent_complete, 100);
        assert_eq!(
            h.audit.actions_for(EMP).await.last().copied(),
            Some("completed")
        );
    }

    /// Directory that knows the managers but cannot lift restrictions.
    struct DirectoryWithoutEmployees;

    #[async_trait]
    impl IdentityService for DirectoryWithoutEmployees {
        async fn is_manager(&self, actor_id: &str) -> bool {
            actor_id == MGR
        }

        async fn mark_onboarded(&self, employee_id: &str) -> Result<(), IdentityError> {
            Err(IdentityError::UnknownEmployee(employee_id.to_string()))
        }
    }

    #[tokio::test]
    async fn completion_stands_when_identity_update_fails() {
        let engine = OnboardingEngine::new(
            Arc::new(MemoryProgressStore::new()),
            Arc::new(StaticContent::new(fixtures::catalog())),
            Arc::new(DirectoryWithoutEmployees),
            Arc::new(MemoryAuditSink::new()),
        );
        engine.initialize(EMP, "Alice", EMP).await.unwrap();
        ready_for_handoff(&engine).await;
        engine.manager_mark_handoff(EMP, MGR, "M. Gr").await.unwrap();
        engine.employee_confirm_handoff(EMP, EMP).await.unwrap();

        let view = engine.complete_onboarding(EMP, EMP).await.unwrap();
        assert!(view.progress.is_complete);
        assert!(engine.overview(EMP).await.unwrap().progress.is_complete);
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_keeps_started_at() {
        let h = harness().await;
        let first = h.engine.overview(EMP).await.unwrap();
        let again = h.engine.initialize(EMP, "Alice Renamed", EMP).await.unwrap();
        assert_eq!(again.progress.started_at, first.progress.started_at);
        assert_eq!(again.progress.employee_name, "Alice");
        assert_eq!(again.progress.version, 1);
        assert_eq!(h.audit.actions_for(EMP).await, vec!["initialized"]);
    }

    #[tokio::test]
    async fn initialize_for_someone_else_requires_manager() {
        let h = harness().await;
        let err = h.engine.initialize("emp-2", "Bob", "emp-3").await.unwrap_err();
        assert!(matches!(err, OnboardingError::Unauthorized { .. }));
        assert!(h.engine.initialize("emp-2", "Bob", "emp-2").await.is_ok());
    }

    #[tokio::test]
    async fn missing_record_is_reported() {
        let h = harness().await;
        assert!(matches!(
            h.engine.overview("ghost").await,
            Err(OnboardingError::RecordNotFound { .. })
        ));
        assert!(matches!(
            h.engine.sign_nda("ghost", nda(true)).await,
            Err(OnboardingError::RecordNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn nda_requires_scroll_and_refuses_resign() {
        let h = harness().await;
        let err = h.engine.sign_nda(EMP, nda(false)).await.unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::GateNotSatisfied {
                reason: GateFailure::NotScrolled,
                ..
            }
        ));

        let view = h.engine.sign_nda(EMP, nda(true)).await.unwrap();
        let record = view.progress.nda.clone().unwrap();
        assert_eq!(record.signed_by, EMP);
        assert_eq!(record.signed_by_name, "Alice");
        assert_eq!(view.status(OnboardingStep::Nda), Some(StepStatus::Completed));

        assert!(matches!(
            h.engine.sign_nda(EMP, nda(true)).await,
            Err(OnboardingError::AlreadySatisfied { step: OnboardingStep::Nda })
        ));
    }

    #[tokio::test]
    async fn documents_locked_until_nda_signed() {
        let h = harness().await;
        let err = h.engine.open_document(EMP, "handbook").await.unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::GateNotSatisfied {
                reason: GateFailure::PriorStepIncomplete { step: OnboardingStep::Nda },
                ..
            }
        ));
        assert!(matches!(
            h.engine.go_to_step(EMP, OnboardingStep::Documents).await,
            Err(OnboardingError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn document_confirmation_boundary_and_idempotency() {
        let h = harness().await;
        h.engine.sign_nda(EMP, nda(true)).await.unwrap();
        h.engine.mark_document_scrolled(EMP, "safety").await.unwrap();
        h.engine.record_reading_time(EMP, "safety", 30).await.unwrap();
        h.engine.record_reading_time(EMP, "safety", 29).await.unwrap();

        let err = h.engine.confirm_document(EMP, "safety").await.unwrap_err();
        match err {
            OnboardingError::GateNotSatisfied { reason, .. } => {
                assert_eq!(reason.seconds_remaining(), Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }

        h.engine.record_reading_time(EMP, "safety", 1).await.unwrap();
        let first = h.engine.confirm_document(EMP, "safety").await.unwrap();
        assert!(first.progress.document("safety").unwrap().confirmed);

        let retry = h.engine.confirm_document(EMP, "safety").await.unwrap();
        assert_eq!(retry.progress.version, first.progress.version);
        let confirmations = h
            .audit
            .actions_for(EMP)
            .await
            .into_iter()
            .filter(|a| *a == "document_confirmed")
            .count();
        assert_eq!(confirmations, 1);
    }

    #[tokio::test]
    async fn reading_time_rejects_negative_and_unknown_documents() {
        let h = harness().await;
        h.engine.sign_nda(EMP, nda(true)).await.unwrap();
        assert!(matches!(
            h.engine.record_reading_time(EMP, "handbook", -5).await,
            Err(OnboardingError::InvalidInput(_))
        ));
        assert!(matches!(
            h.engine.record_reading_time(EMP, "nope", 5).await,
            Err(OnboardingError::UnknownDocument(_))
        ));
        let view = h.engine.record_reading_time(EMP, "handbook", 0).await.unwrap();
        assert!(view.progress.document("handbook").is_none());
    }

    #[tokio::test]
    async fn confirm_without_scroll_is_refused() {
        let h = harness().await;
        h.engine.sign_nda(EMP, nda(true)).await.unwrap();
        h.engine.record_reading_time(EMP, "handbook", 500).await.unwrap();
        assert!(matches!(
            h.engine.confirm_document(EMP, "handbook").await,
            Err(OnboardingError::GateNotSatisfied {
                reason: GateFailure::NotScrolled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn video_ignores_stale_positions_and_clamps_seek() {
        let h = harness().await;
        h.engine.sign_nda(EMP, nda(true)).await.unwrap();
        read_all_documents(&h.engine).await;

        h.engine.report_video_progress(EMP, 120.0, 600.0).await.unwrap();
        let view = h.engine.report_video_progress(EMP, 30.0, 600.0).await.unwrap();
        let video = view.progress.video.unwrap();
        assert_eq!(video.furthest_reached, 120.0);
        assert_eq!(video.last_position, 30.0);

        let seek = h.engine.request_seek(EMP, 500.0).await.unwrap();
        assert_eq!(seek.effective_position, 120.0);
        let seek = h.engine.request_seek(EMP, 60.0).await.unwrap();
        assert_eq!(seek.effective_position, 60.0);

        assert!(h.engine.report_video_progress(EMP, f64::NAN, 600.0).await.is_err());
        assert!(h.engine.request_seek(EMP, -1.0).await.is_err());
    }

    #[tokio::test]
    async fn configured_duration_beats_reported_duration() {
        let h = harness().await;
        h.engine.sign_nda(EMP, nda(true)).await.unwrap();
        read_all_documents(&h.engine).await;
        let view = h.engine.report_video_progress(EMP, 5_000.0, 10.0).await.unwrap();
        let video = view.progress.video.unwrap();
        assert_eq!(video.total_duration, 600.0);
        assert_eq!(video.furthest_reached, 600.0);
        assert!(!video.completed);
    }

    #[tokio::test]
    async fn resume_position_reconciles_client_cache() {
        let h = harness().await;
        h.engine.sign_nda(EMP, nda(true)).await.unwrap();
        read_all_documents(&h.engine).await;
        h.engine.report_video_progress(EMP, 200.0, 600.0).await.unwrap();
        h.engine.report_video_progress(EMP, 100.0, 600.0).await.unwrap();

        let cache = ClientVideoCache {
            last_position: 150.0,
            furthest_reached: 590.0,
        };
        let resume = h.engine.resume_position(EMP, Some(cache)).await.unwrap();
        assert_eq!(resume.position, 150.0);
        assert_eq!(resume.furthest_reached, 200.0);

        let forged = ClientVideoCache {
            last_position: 550.0,
            furthest_reached: 600.0,
        };
        let resume = h.engine.resume_position(EMP, Some(forged)).await.unwrap();
        assert_eq!(resume.position, 200.0);
        let stored = h.engine.overview(EMP).await.unwrap().progress.video.unwrap();
        assert_eq!(stored.furthest_reached, 200.0);
    }

    #[tokio::test]
    async fn quiz_locked_until_video_done() {
        let h = harness().await;
        h.engine.sign_nda(EMP, nda(true)).await.unwrap();
        read_all_documents(&h.engine).await;
        let err = h.engine.submit_quiz(EMP, answers_with_wrong(0)).await.unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::GateNotSatisfied {
                reason: GateFailure::PriorStepIncomplete { step: OnboardingStep::Video },
                ..
            }
        ));
        assert_eq!(h.engine.attempts_remaining(EMP).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn quiz_refuses_after_pass() {
        let h = harness().await;
        ready_for_quiz(&h.engine).await;
        let result = h.engine.submit_quiz(EMP, answers_with_wrong(1)).await.unwrap();
        assert_eq!(result.score, 90);
        assert!(result.passed);

        assert!(matches!(
            h.engine.submit_quiz(EMP, answers_with_wrong(0)).await,
            Err(OnboardingError::AlreadySatisfied { step: OnboardingStep::Quiz })
        ));
        let view = h.engine.overview(EMP).await.unwrap();
        assert_eq!(view.progress.quiz_attempts.len(), 1);
    }

    #[tokio::test]
    async fn quiz_exhaustion() {
        let h = harness().await;
        ready_for_quiz(&h.engine).await;
        for expected_remaining in [2, 1, 0] {
            let result = h.engine.submit_quiz(EMP, answers_with_wrong(5)).await.unwrap();
            assert!(!result.passed);
            assert_eq!(result.attempts_remaining, expected_remaining);
        }
        assert!(matches!(
            h.engine.submit_quiz(EMP, answers_with_wrong(0)).await,
            Err(OnboardingError::AttemptsExhausted { max_attempts: 3 })
        ));
        let view = h.engine.overview(EMP).await.unwrap();
        assert_eq!(view.progress.quiz_attempts.len(), 3);
        assert_eq!(view.progress.current_step, OnboardingStep::Quiz);
        assert_eq!(view.status(OnboardingStep::Quiz), Some(StepStatus::InProgress));

        // Review routing is the caller's decision; earlier steps stay reachable.
        let view = h.engine.go_to_step(EMP, OnboardingStep::Documents).await.unwrap();
        assert_eq!(view.progress.current_step, OnboardingStep::Documents);
    }

    #[tokio::test]
    async fn handoff_confirm_before_mark_is_refused() {
        let h = harness().await;
        ready_for_handoff(&h.engine).await;
        assert!(matches!(
            h.engine.employee_confirm_handoff(EMP, EMP).await,
            Err(OnboardingError::GateNotSatisfied {
                reason: GateFailure::HandoffNotMarked,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn handoff_is_idempotent_for_both_parties() {
        let h = harness().await;
        ready_for_handoff(&h.engine).await;

        let marked = h.engine.manager_mark_handoff(EMP, MGR, "M. Gr").await.unwrap();
        let again = h.engine.manager_mark_handoff(EMP, MGR, "M. Gr").await.unwrap();
        assert_eq!(again.progress.version, marked.progress.version);

        let confirmed = h.engine.employee_confirm_handoff(EMP, EMP).await.unwrap();
        let again = h.engine.employee_confirm_handoff(EMP, EMP).await.unwrap();
        assert_eq!(again.progress.version, confirmed.progress.version);
        assert_eq!(again.progress.physical_handoff, confirmed.progress.physical_handoff);
    }

    #[tokio::test]
    async fn handoff_authorization() {
        let h = harness().await;
        ready_for_handoff(&h.engine).await;
        assert!(matches!(
            h.engine.manager_mark_handoff(EMP, EMP, "self-signed").await,
            Err(OnboardingError::Unauthorized { .. })
        ));
        h.engine.manager_mark_handoff(EMP, MGR, "sig").await.unwrap();
        assert!(matches!(
            h.engine.employee_confirm_handoff(EMP, MGR).await,
            Err(OnboardingError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn handoff_mark_requires_notification() {
        let h = harness().await;
        ready_for_quiz(&h.engine).await;
        h.engine.submit_quiz(EMP, answers_with_wrong(0)).await.unwrap();
        assert!(h.engine.manager_mark_handoff(EMP, MGR, "sig").await.is_err());
    }

    #[tokio::test]
    async fn concurrent_mark_and_confirm_never_confirm_unmarked() {
        let h = harness().await;
        ready_for_handoff(&h.engine).await;

        let e1 = h.engine.clone();
        let e2 = h.engine.clone();
        let mark = tokio::spawn(async move { e1.manager_mark_handoff(EMP, MGR, "sig").await });
        let confirm = tokio::spawn(async move { e2.employee_confirm_handoff(EMP, EMP).await });
        mark.await.unwrap().unwrap();
        let confirm_result = confirm.await.unwrap();

        let view = h.engine.overview(EMP).await.unwrap();
        let handoff = view.progress.physical_handoff.unwrap();
        assert!(handoff.marked_by_manager);
        assert_eq!(handoff.confirmed_by_employee, confirm_result.is_ok());
    }

    #[tokio::test]
    async fn complete_requires_confirmation_and_notifies_identity_once() {
        let h = harness().await;
        ready_for_handoff(&h.engine).await;
        h.engine.manager_mark_handoff(EMP, MGR, "sig").await.unwrap();
        assert!(matches!(
            h.engine.complete_onboarding(EMP, EMP).await,
            Err(OnboardingError::GateNotSatisfied {
                reason: GateFailure::HandoffNotConfirmed,
                ..
            })
        ));
        assert!(h.identity.is_new_employee(EMP).await);

        h.engine.employee_confirm_handoff(EMP, EMP).await.unwrap();
        let view = h.engine.complete_onboarding(EMP, EMP).await.unwrap();
        assert!(view.progress.is_complete);
        assert_eq!(view.status(OnboardingStep::Complete), Some(StepStatus::Completed));
        assert!(!h.identity.is_new_employee(EMP).await);

        let again = h.engine.complete_onboarding(EMP, EMP).await.unwrap();
        assert_eq!(again.progress.version, view.progress.version);
        let completions = h
            .audit
            .actions_for(EMP)
            .await
            .into_iter()
            .filter(|a| *a == "completed")
            .count();
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn reset_restarts_from_scratch() {
        let h = harness().await;
        ready_for_handoff(&h.engine).await;
        let before = h.engine.overview(EMP).await.unwrap();

        assert!(matches!(
            h.engine.reset(EMP, EMP).await,
            Err(OnboardingError::Unauthorized { .. })
        ));

        let view = h.engine.reset(EMP, MGR).await.unwrap();
        assert_eq!(view.progress.current_step, OnboardingStep::Nda);
        assert!(view.progress.quiz_attempts.is_empty());
        assert!(view.progress.nda.is_none());
        assert!(!view.progress.is_complete);
        assert!(view.progress.started_at >= before.progress.started_at);
        assert!(view.progress.version > before.progress.version);
        assert_eq!(view.progress.audit_log.len(), 1);
        assert_eq!(view.progress.audit_log[0].action, AuditAction::Reset);
        assert_eq!(view.progress.audit_log[0].actor, MGR);
    }

    #[tokio::test]
    async fn new_required_document_reopens_gate() {
        let h = harness().await;
        ready_for_quiz(&h.engine).await;

        let mut catalog = fixtures::catalog();
        catalog.documents.push(ReadingDocument {
            id: "privacy".into(),
            title: "Privacy Policy".into(),
            reference: None,
            minimum_reading_seconds: 30,
        });
        h.content.replace(catalog).await.unwrap();

        let view = h.engine.overview(EMP).await.unwrap();
        assert_eq!(view.status(OnboardingStep::Documents), Some(StepStatus::Available));
        assert_eq!(view.status(OnboardingStep::Quiz), Some(StepStatus::Locked));
        assert!(h.engine.submit_quiz(EMP, answers_with_wrong(0)).await.is_err());

        h.engine.mark_document_scrolled(EMP, "privacy").await.unwrap();
        h.engine.record_reading_time(EMP, "privacy", 30).await.unwrap();
        h.engine.confirm_document(EMP, "privacy").await.unwrap();
        assert!(h.engine.submit_quiz(EMP, answers_with_wrong(0)).await.is_ok());
    }

    #[tokio::test]
    async fn list_progress_is_manager_only() {
        let h = harness().await;
        h.engine.initialize("emp-2", "Bob", MGR).await.unwrap();
        ready_for_handoff(&h.engine).await;

        assert!(h.engine.list_progress(EMP).await.is_err());
        let rows = h.engine.list_progress(MGR).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].employee_id, EMP);
        assert!(rows[0].awaiting_handoff);
        assert!(!rows[1].awaiting_handoff);
        assert_eq!(rows[1].percent_complete, 0);
    }

    #[tokio::test]
    async fn navigation_and_advance() {
        let h = harness().await;
        assert!(matches!(
            h.engine.advance(EMP).await,
            Err(OnboardingError::InvalidTransition { .. })
        ));
        h.engine.sign_nda(EMP, nda(true)).await.unwrap();
        let view = h.engine.advance(EMP).await.unwrap();
        assert_eq!(view.progress.current_step, OnboardingStep::Documents);
        assert_eq!(view.status(OnboardingStep::Documents), Some(StepStatus::InProgress));

        let back = h.engine.go_to_step(EMP, OnboardingStep::Nda).await.unwrap();
        assert_eq!(back.status(OnboardingStep::Nda), Some(StepStatus::Completed));
        assert_eq!(back.status(OnboardingStep::Documents), Some(StepStatus::Available));
    }

    /// Store whose first `conflicts` saves lose a race to another writer.
    struct RacingStore {
        inner: MemoryProgressStore,
        conflicts: AtomicU32,
    }

    #[async_trait]
    impl ProgressStore for RacingStore {
        async fn get(&self, id: &str) -> Result<Option<ProgressAggregate>, DatabaseError> {
            self.inner.get(id).await
        }

        async fn insert(&self, p: &ProgressAggregate) -> Result<(), DatabaseError> {
            self.inner.insert(p).await
        }

        async fn save(&self, p: &ProgressAggregate, expected: u64) -> Result<(), DatabaseError> {
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                if let Some(mut other) = self.inner.get(&p.employee_id).await? {
                    other.version += 1;
                    self.inner.save(&other, other.version - 1).await?;
                }
            }
            self.inner.save(p, expected).await
        }

        async fn list(&self) -> Result<Vec<ProgressAggregate>, DatabaseError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn version_conflict_is_reapplied() {
        let store = Arc::new(RacingStore {
            inner: MemoryProgressStore::new(),
            conflicts: AtomicU32::new(0),
        });
        let h = harness_with_store(store.clone());
        h.engine.initialize(EMP, "Alice", EMP).await.unwrap();

        store.conflicts.store(2, Ordering::SeqCst);
        let view = h.engine.sign_nda(EMP, nda(true)).await.unwrap();
        assert!(view.progress.nda.is_some());
        // initialize=1, two foreign writes, then our save.
        assert_eq!(view.progress.version, 4);
    }

    #[tokio::test]
    async fn persistent_conflict_surfaces() {
        let store = Arc::new(RacingStore {
            inner: MemoryProgressStore::new(),
            conflicts: AtomicU32::new(0),
        });
        let h = harness_with_store(store.clone());
        h.engine.initialize(EMP, "Alice", EMP).await.unwrap();

        store.conflicts.store(10, Ordering::SeqCst);
        assert!(matches!(
            h.engine.sign_nda(EMP, nda(true)).await,
            Err(OnboardingError::Conflict { .. })
        ));
    }

    /// Store that lets another writer move the pointer right after a read.
    struct InterleavingStore {
        inner: MemoryProgressStore,
        jump_to: std::sync::Mutex<Option<OnboardingStep>>,
    }

    #[async_trait]
    impl ProgressStore for InterleavingStore {
        async fn get(&self, id: &str) -> Result<Option<ProgressAggregate>, DatabaseError> {
            let snapshot = self.inner.get(id).await?;
            let jump = self.jump_to.lock().unwrap().take();
            if let (Some(step), Some(seen)) = (jump, snapshot.as_ref()) {
                let mut other = seen.clone();
                other.current_step = step;
                other.version += 1;
                self.inner.save(&other, seen.version).await?;
            }
            Ok(snapshot)
        }

        async fn insert(&self, p: &ProgressAggregate) -> Result<(), DatabaseError> {
            self.inner.insert(p).await
        }

        async fn save(&self, p: &ProgressAggregate, expected: u64) -> Result<(), DatabaseError> {
            self.inner.save(p, expected).await
        }

        async fn list(&self) -> Result<Vec<ProgressAggregate>, DatabaseError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn advance_follows_a_move_that_lands_after_its_read() {
        let store = Arc::new(InterleavingStore {
            inner: MemoryProgressStore::new(),
            jump_to: std::sync::Mutex::new(None),
        });
        let h = harness_with_store(store.clone());
        h.engine.initialize(EMP, "Alice", EMP).await.unwrap();
        ready_for_handoff(&h.engine).await;
        h.engine.go_to_step(EMP, OnboardingStep::Nda).await.unwrap();

        *store.jump_to.lock().unwrap() = Some(OnboardingStep::Video);
        let view = h.engine.advance(EMP).await.unwrap();
        assert_eq!(view.progress.current_step, OnboardingStep::Quiz);
        assert_eq!(
            h.engine.overview(EMP).await.unwrap().progress.current_step,
            OnboardingStep::Quiz
        );
    }

    #[tokio::test]
    async fn lock_map_does_not_grow_for_unknown_employees() {
        let h = harness().await;
        for i in 0..1000 {
            assert!(matches!(
                h.engine.mark_video_ended(&format!("ghost-{i}")).await,
                Err(OnboardingError::RecordNotFound { .. })
            ));
        }
        assert!(h.engine.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn lock_entries_are_released_after_concurrent_writes() {
        let h = harness().await;
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&h.engine);
                tokio::spawn(async move { engine.go_to_step(EMP, OnboardingStep::Nda).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(h.engine.locks.lock().await.is_empty());
    }
}
