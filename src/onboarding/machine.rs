//! Step state machine: derives each step's status from the aggregate.
//!
//! Status is never stored. A step is `completed` when its own predicate holds
//! and every earlier step is completed; any step after the first incomplete
//! one is `locked`.

use serde::Serialize;

use crate::content::ContentCatalog;
use crate::error::{GateFailure, OnboardingError};

use super::gates;
use super::model::ProgressAggregate;
use super::step::{OnboardingStep, STEP_ORDER, StepStatus};

/// Status of one step, for the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepView {
    pub step: OnboardingStep,
    pub status: StepStatus,
}

/// The step's own completion predicate, ignoring earlier steps.
pub fn step_satisfied(
    progress: &ProgressAggregate,
    catalog: &ContentCatalog,
    step: OnboardingStep,
) -> bool {
    match step {
        OnboardingStep::Nda => progress.nda.is_some(),
        OnboardingStep::Documents => gates::documents_complete(progress, catalog).is_ok(),
        OnboardingStep::Video => gates::video_gate(progress).is_ok(),
        OnboardingStep::Quiz => gates::quiz_passed(progress).is_ok(),
        OnboardingStep::Notification => progress.notification_acknowledged_at.is_some(),
        OnboardingStep::Handoff => progress.handoff_marked(),
        OnboardingStep::Confirmation => progress.handoff_confirmed(),
        OnboardingStep::Complete => progress.is_complete,
    }
}

/// The first step whose predicate does not hold, if any.
pub fn first_incomplete(
    progress: &ProgressAggregate,
    catalog: &ContentCatalog,
) -> Option<OnboardingStep> {
    STEP_ORDER
        .into_iter()
        .find(|step| !step_satisfied(progress, catalog, *step))
}

/// Status of every step, in order.
pub fn statuses(progress: &ProgressAggregate, catalog: &ContentCatalog) -> Vec<StepView> {
    let frontier = first_incomplete(progress, catalog);
    STEP_ORDER
        .into_iter()
        .map(|step| StepView {
            step,
            status: derive(progress.current_step, frontier, step),
        })
        .collect()
}

pub fn status(
    progress: &ProgressAggregate,
    catalog: &ContentCatalog,
    step: OnboardingStep,
) -> StepStatus {
    derive(progress.current_step, first_incomplete(progress, catalog), step)
}

fn derive(
    current: OnboardingStep,
    frontier: Option<OnboardingStep>,
    step: OnboardingStep,
) -> StepStatus {
    match frontier {
        None => StepStatus::Completed,
        Some(first) if step < first => StepStatus::Completed,
        Some(first) if step > first => StepStatus::Locked,
        Some(_) if step == current => StepStatus::InProgress,
        Some(_) => StepStatus::Available,
    }
}

/// Fail unless every step before `step` is completed.
pub fn require_unlocked(
    progress: &ProgressAggregate,
    catalog: &ContentCatalog,
    step: OnboardingStep,
) -> Result<(), OnboardingError> {
    match first_incomplete(progress, catalog) {
        Some(first) if first < step => Err(OnboardingError::gate(
            step,
            GateFailure::PriorStepIncomplete { step: first },
        )),
        _ => Ok(()),
    }
}

/// Navigation is allowed to any step that is not locked.
pub fn check_navigation(
    progress: &ProgressAggregate,
    catalog: &ContentCatalog,
    target: OnboardingStep,
) -> Result<(), OnboardingError> {
    if status(progress, catalog, target) == StepStatus::Locked {
        return Err(OnboardingError::InvalidTransition {
            from: progress.current_step,
            to: target,
        });
    }
    Ok(())
}

/// Share of steps completed, 0–100.
pub fn percent_complete(progress: &ProgressAggregate, catalog: &ContentCatalog) -> u32 {
    let done = match first_incomplete(progress, catalog) {
        Some(first) => first.index(),
        None => STEP_ORDER.len(),
    };
    (done * 100 / STEP_ORDER.len()) as u32
}
