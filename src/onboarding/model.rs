//! Progress aggregate: the single per-employee onboarding record.

use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::OnboardingStep;

/// An append-only log. Entries can be pushed and read, never edited or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppendLog<T>(Vec<T>);

impl<T> AppendLog<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn append(&mut self, entry: T) {
        self.0.push(entry);
    }
}

impl<T> Default for AppendLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for AppendLog<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

/// A signed confidentiality agreement. Presence means signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdaRecord {
    /// Signature image as a data URL or base64 blob.
    pub signature_image: String,
    pub signed_by: String,
    pub signed_by_name: String,
    pub signed_at: DateTime<Utc>,
    /// Location of the rendered agreement, if one was generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_reference: Option<String>,
}

/// Reading state for one configured document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentProgress {
    pub document_id: String,
    pub started: bool,
    /// The caller reported the document was scrolled to its end.
    pub scrolled_to_end: bool,
    pub confirmed: bool,
    pub time_spent_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl DocumentProgress {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            started: false,
            scrolled_to_end: false,
            confirmed: false,
            time_spent_seconds: 0,
            confirmed_at: None,
        }
    }
}

/// Playback state for the training video, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProgress {
    pub last_position: f64,
    /// Maximum position ever observed. Never decreases.
    pub furthest_reached: f64,
    pub total_duration: f64,
    pub completed: bool,
}

impl VideoProgress {
    pub fn new(total_duration: f64) -> Self {
        Self {
            last_position: 0.0,
            furthest_reached: 0.0,
            total_duration,
            completed: false,
        }
    }

    /// Record a playback position. Positions past the end are clamped.
    pub fn report(&mut self, position: f64) {
        let position = position.clamp(0.0, self.total_duration);
        self.last_position = position;
        if position > self.furthest_reached {
            self.furthest_reached = position;
        }
    }

    /// Where a seek to `target` actually lands: never past watched content.
    pub fn clamp_seek(&self, target: f64) -> f64 {
        target.clamp(0.0, self.furthest_reached)
    }

    /// Playback reached the natural end.
    pub fn mark_ended(&mut self) {
        self.furthest_reached = self.total_duration;
        self.last_position = self.total_duration;
        self.completed = true;
    }

    pub fn percent_watched(&self) -> u32 {
        if self.total_duration <= 0.0 {
            return 0;
        }
        ((self.furthest_reached / self.total_duration) * 100.0).round() as u32
    }
}

/// One graded quiz submission. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub attempt_number: u32,
    pub score: u32,
    pub passed: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Two-party equipment handoff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub marked_by_manager: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marked_at: Option<DateTime<Utc>>,
    pub confirmed_by_employee: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// What a state-changing operation did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditAction {
    Initialized,
    Navigated { from: OnboardingStep, to: OnboardingStep },
    NdaSigned,
    DocumentOpened { document_id: String },
    DocumentScrolled { document_id: String },
    ReadingTimeRecorded { document_id: String, delta_seconds: u64 },
    DocumentConfirmed { document_id: String },
    VideoProgress { position: f64, furthest_reached: f64 },
    VideoSeek { requested: f64, effective: f64 },
    VideoEnded,
    QuizSubmitted { attempt_number: u32, score: u32, passed: bool },
    NotificationAcknowledged,
    HandoffMarked,
    HandoffConfirmed,
    Completed,
    Reset,
}

impl AuditAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Navigated { .. } => "navigated",
            Self::NdaSigned => "nda_signed",
            Self::DocumentOpened { .. } => "document_opened",
            Self::DocumentScrolled { .. } => "document_scrolled",
            Self::ReadingTimeRecorded { .. } => "reading_time_recorded",
            Self::DocumentConfirmed { .. } => "document_confirmed",
            Self::VideoProgress { .. } => "video_progress",
            Self::VideoSeek { .. } => "video_seek",
            Self::VideoEnded => "video_ended",
            Self::QuizSubmitted { .. } => "quiz_submitted",
            Self::NotificationAcknowledged => "notification_acknowledged",
            Self::HandoffMarked => "handoff_marked",
            Self::HandoffConfirmed => "handoff_confirmed",
            Self::Completed => "completed",
            Self::Reset => "reset",
        }
    }
}

/// One compliance log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    /// Who performed the operation (employee or manager id).
    pub actor: String,
    pub action: AuditAction,
    /// Aggregate version produced by this operation.
    pub version: u64,
}

/// All onboarding state for one employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressAggregate {
    pub employee_id: String,
    pub employee_name: String,
    /// Set once, on creation.
    pub started_at: DateTime<Utc>,
    pub current_step: OnboardingStep,
    #[serde(default)]
    pub nda: Option<NdaRecord>,
    #[serde(default)]
    pub documents: Vec<DocumentProgress>,
    #[serde(default)]
    pub video: Option<VideoProgress>,
    #[serde(default)]
    pub quiz_attempts: AppendLog<QuizAttempt>,
    #[serde(default)]
    pub notification_acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub physical_handoff: Option<HandoffRecord>,
    pub is_complete: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub audit_log: AppendLog<AuditEntry>,
    /// Optimistic-concurrency token, bumped on every persisted change.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl ProgressAggregate {
    /// A fresh record with every gate empty.
    pub fn new(employee_id: impl Into<String>, employee_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            employee_id: employee_id.into(),
            employee_name: employee_name.into(),
            started_at: now,
            current_step: OnboardingStep::Nda,
            nda: None,
            documents: Vec::new(),
            video: None,
            quiz_attempts: AppendLog::new(),
            notification_acknowledged_at: None,
            physical_handoff: None,
            is_complete: false,
            completed_at: None,
            audit_log: AppendLog::new(),
            version: 0,
            updated_at: now,
        }
    }

    pub fn document(&self, document_id: &str) -> Option<&DocumentProgress> {
        self.documents.iter().find(|d| d.document_id == document_id)
    }

    /// Get the entry for a document, creating an unstarted one if needed.
    pub fn document_mut(&mut self, document_id: &str) -> &mut DocumentProgress {
        let idx = match self.documents.iter().position(|d| d.document_id == document_id) {
            Some(idx) => idx,
            None => {
                self.documents.push(DocumentProgress::new(document_id));
                self.documents.len() - 1
            }
        };
        &mut self.documents[idx]
    }

    pub fn has_passed_quiz(&self) -> bool {
        self.quiz_attempts.iter().any(|a| a.passed)
    }

    pub fn handoff_marked(&self) -> bool {
        self.physical_handoff
            .as_ref()
            .is_some_and(|h| h.marked_by_manager)
    }

    pub fn handoff_confirmed(&self) -> bool {
        self.physical_handoff
            .as_ref()
            .is_some_and(|h| h.confirmed_by_employee)
    }

    /// Append an audit entry stamped with the current version.
    pub fn record(&mut self, actor: &str, action: AuditAction) -> AuditEntry {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            at: Utc::now(),
            actor: actor.to_string(),
            action,
            version: self.version,
        };
        self.audit_log.append(entry.clone());
        entry
    }
}
