//! Two-party equipment handoff: the manager marks, the employee confirms,
//! then onboarding can be completed.
//!
//! Both parties act from separate sessions and stale clients retry, so a
//! repeated mark or confirm is a no-op rather than an error.

use chrono::{DateTime, Utc};

use crate::content::ContentCatalog;
use crate::error::{GateFailure, OnboardingError};

use super::gates::Admission;
use super::machine;
use super::model::{HandoffRecord, ProgressAggregate};
use super::step::OnboardingStep;

/// Manager records that equipment was handed over.
pub fn mark(
    progress: &mut ProgressAggregate,
    catalog: &ContentCatalog,
    manager_id: &str,
    signature: &str,
    now: DateTime<Utc>,
) -> Result<Admission, OnboardingError> {
    if progress.handoff_marked() {
        return Ok(Admission::AlreadyDone);
    }
    machine::require_unlocked(progress, catalog, OnboardingStep::Handoff)?;
    if signature.trim().is_empty() {
        return Err(OnboardingError::InvalidInput(
            "manager signature is required".into(),
        ));
    }

    let record = progress.physical_handoff.get_or_insert_with(HandoffRecord::default);
    record.marked_by_manager = true;
    record.marked_by = Some(manager_id.to_string());
    record.manager_signature = Some(signature.to_string());
    record.marked_at = Some(now);
    Ok(Admission::Proceed)
}

/// Employee acknowledges receipt. Only valid once the manager has marked.
pub fn confirm(
    progress: &mut ProgressAggregate,
    now: DateTime<Utc>,
) -> Result<Admission, OnboardingError> {
    let record = match progress.physical_handoff.as_mut() {
        Some(record) if record.marked_by_manager => record,
        _ => {
            return Err(OnboardingError::gate(
                OnboardingStep::Confirmation,
                GateFailure::HandoffNotMarked,
            ));
        }
    };
    if record.confirmed_by_employee {
        return Ok(Admission::AlreadyDone);
    }
    record.confirmed_by_employee = true;
    record.confirmed_at = Some(now);
    Ok(Admission::Proceed)
}

/// Terminal transition. Only valid after the employee confirmed the handoff.
pub fn complete(
    progress: &mut ProgressAggregate,
    catalog: &ContentCatalog,
    now: DateTime<Utc>,
) -> Result<Admission, OnboardingError> {
    if progress.is_complete {
        return Ok(Admission::AlreadyDone);
    }
    if !progress.handoff_confirmed() {
        return Err(OnboardingError::gate(
            OnboardingStep::Complete,
            GateFailure::HandoffNotConfirmed,
        ));
    }
    machine::require_unlocked(progress, catalog, OnboardingStep::Complete)?;

    progress.is_complete = true;
    progress.completed_at = Some(now);
    progress.current_step = OnboardingStep::Complete;
    Ok(Admission::Proceed)
}
