//! Error types for the onboarding engine.

use crate::onboarding::step::OnboardingStep;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse content catalog: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record already exists for employee {0}")]
    AlreadyExists(String),

    #[error("Version conflict for employee {employee_id}: expected {expected}, found {found:?}")]
    VersionConflict {
        employee_id: String,
        expected: u64,
        found: Option<u64>,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// The specific condition a gate found unmet.
///
/// Callers render these to tell the employee what to do next.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateFailure {
    #[error("content must be scrolled to the end first")]
    NotScrolled,

    #[error("minimum reading time not reached: {spent}s of {required}s")]
    InsufficientReadingTime { required: u64, spent: u64 },

    #[error("{confirmed} of {required} documents confirmed")]
    DocumentsIncomplete { confirmed: usize, required: usize },

    #[error("the training video has not been watched to the end")]
    VideoNotFinished,

    #[error("no passing quiz attempt")]
    QuizNotPassed,

    #[error("step {step} must be completed first")]
    PriorStepIncomplete { step: OnboardingStep },

    #[error("the manager has not marked the handoff yet")]
    HandoffNotMarked,

    #[error("the employee has not confirmed the handoff yet")]
    HandoffNotConfirmed,
}

impl GateFailure {
    /// Seconds still to wait, for time-gated failures.
    pub fn seconds_remaining(&self) -> Option<u64> {
        match self {
            Self::InsufficientReadingTime { required, spent } => {
                Some(required.saturating_sub(*spent))
            }
            _ => None,
        }
    }
}

/// Per-employee, per-operation outcomes of the onboarding engine.
///
/// None of these are fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("Gate not satisfied for step {step}: {reason}")]
    GateNotSatisfied {
        step: OnboardingStep,
        reason: GateFailure,
    },

    #[error("Step {step} is already satisfied")]
    AlreadySatisfied { step: OnboardingStep },

    #[error("All {max_attempts} quiz attempts have been used")]
    AttemptsExhausted { max_attempts: u32 },

    #[error("Cannot move from {from} to {to}: step is locked")]
    InvalidTransition {
        from: OnboardingStep,
        to: OnboardingStep,
    },

    #[error("No onboarding record for employee {employee_id}")]
    RecordNotFound { employee_id: String },

    #[error("Unknown document: {0}")]
    UnknownDocument(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{actor} is not allowed to {operation}")]
    Unauthorized { actor: String, operation: String },

    #[error("Concurrent update conflict for employee {employee_id}")]
    Conflict { employee_id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl OnboardingError {
    /// Stable snake_case identifier for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::GateNotSatisfied { .. } => "gate_not_satisfied",
            Self::AlreadySatisfied { .. } => "already_satisfied",
            Self::AttemptsExhausted { .. } => "attempts_exhausted",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::RecordNotFound { .. } => "record_not_found",
            Self::UnknownDocument(_) => "unknown_document",
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Conflict { .. } => "conflict",
            Self::Storage(_) => "storage",
        }
    }

    pub(crate) fn gate(step: OnboardingStep, reason: GateFailure) -> Self {
        Self::GateNotSatisfied { step, reason }
    }
}
