//! Gate evaluators: stateless checks over a progress aggregate and content.
//!
//! Each evaluator either admits an action or names the unmet condition.
//! None of them mutate anything; the engine applies the change afterwards.

use crate::content::{ContentCatalog, QuizConfig, ReadingDocument};
use crate::error::{GateFailure, OnboardingError};

use super::model::ProgressAggregate;
use super::step::OnboardingStep;

/// Outcome of an admitted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The precondition holds and the action changes state.
    Proceed,
    /// The action already happened; retrying is a no-op.
    AlreadyDone,
}

/// May the employee sign the agreement now?
///
/// The scroll flag comes from the UI and is taken at face value. An existing
/// signature is reported before the scroll flag, so any re-sign is a conflict.
pub fn nda_gate(progress: &ProgressAggregate, scrolled_to_end: bool) -> Result<(), OnboardingError> {
    if progress.nda.is_some() {
        return Err(OnboardingError::AlreadySatisfied {
            step: OnboardingStep::Nda,
        });
    }
    if !scrolled_to_end {
        return Err(OnboardingError::gate(OnboardingStep::Nda, GateFailure::NotScrolled));
    }
    Ok(())
}

/// May this document be confirmed as read?
///
/// Requires the scroll-complete signal and the configured minimum reading
/// time, both as recorded on the aggregate.
pub fn document_gate(
    progress: &ProgressAggregate,
    document: &ReadingDocument,
) -> Result<Admission, OnboardingError> {
    let Some(entry) = progress.document(&document.id) else {
        return Err(OnboardingError::gate(OnboardingStep::Documents, GateFailure::NotScrolled));
    };
    if entry.confirmed {
        return Ok(Admission::AlreadyDone);
    }
    if !entry.scrolled_to_end {
        return Err(OnboardingError::gate(OnboardingStep::Documents, GateFailure::NotScrolled));
    }
    if entry.time_spent_seconds < document.minimum_reading_seconds {
        return Err(OnboardingError::gate(
            OnboardingStep::Documents,
            GateFailure::InsufficientReadingTime {
                required: document.minimum_reading_seconds,
                spent: entry.time_spent_seconds,
            },
        ));
    }
    Ok(Admission::Proceed)
}

/// Every currently configured document is confirmed.
///
/// Counted against the live catalog, so a newly added document re-opens
/// the gate for employees who have not read it.
pub fn documents_complete(
    progress: &ProgressAggregate,
    catalog: &ContentCatalog,
) -> Result<(), GateFailure> {
    let required = catalog.documents.len();
    let confirmed = catalog
        .documents
        .iter()
        .filter(|d| progress.document(&d.id).is_some_and(|p| p.confirmed))
        .count();
    if confirmed == required {
        Ok(())
    } else {
        Err(GateFailure::DocumentsIncomplete { confirmed, required })
    }
}

pub fn video_gate(progress: &ProgressAggregate) -> Result<(), GateFailure> {
    match &progress.video {
        Some(v) if v.completed => Ok(()),
        _ => Err(GateFailure::VideoNotFinished),
    }
}

/// May another quiz attempt be submitted?
pub fn quiz_gate(progress: &ProgressAggregate, quiz: &QuizConfig) -> Result<(), OnboardingError> {
    if progress.has_passed_quiz() {
        return Err(OnboardingError::AlreadySatisfied {
            step: OnboardingStep::Quiz,
        });
    }
    if progress.quiz_attempts.len() >= quiz.max_attempts as usize {
        return Err(OnboardingError::AttemptsExhausted {
            max_attempts: quiz.max_attempts,
        });
    }
    Ok(())
}

pub fn quiz_passed(progress: &ProgressAggregate) -> Result<(), GateFailure> {
    if progress.has_passed_quiz() {
        Ok(())
    } else {
        Err(GateFailure::QuizNotPassed)
    }
}

/// Attempts left before the quiz locks pending review.
pub fn attempts_remaining(progress: &ProgressAggregate, quiz: &QuizConfig) -> u32 {
    let used = u32::try_from(progress.quiz_attempts.len()).unwrap_or(u32::MAX);
    quiz.max_attempts.saturating_sub(used)
}
