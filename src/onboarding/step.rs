//! Onboarding steps and their fixed order.

use serde::{Deserialize, Serialize};

/// The gates a new hire passes through, in order.
///
/// Progresses linearly: Nda → Documents → Video → Quiz → Notification →
/// Handoff → Confirmation → Complete. The order never changes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    Nda,
    Documents,
    Video,
    Quiz,
    Notification,
    Handoff,
    Confirmation,
    Complete,
}

/// Every step, in dependency order.
pub const STEP_ORDER: [OnboardingStep; 8] = [
    OnboardingStep::Nda,
    OnboardingStep::Documents,
    OnboardingStep::Video,
    OnboardingStep::Quiz,
    OnboardingStep::Notification,
    OnboardingStep::Handoff,
    OnboardingStep::Confirmation,
    OnboardingStep::Complete,
];

impl OnboardingStep {
    /// Position of this step in [`STEP_ORDER`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Get the next step in the linear progression, if any.
    pub fn next(&self) -> Option<OnboardingStep> {
        STEP_ORDER.get(self.index() + 1).copied()
    }
}

impl Default for OnboardingStep {
    fn default() -> Self {
        Self::Nda
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Nda => "nda",
            Self::Documents => "documents",
            Self::Video => "video",
            Self::Quiz => "quiz",
            Self::Notification => "notification",
            Self::Handoff => "handoff",
            Self::Confirmation => "confirmation",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for OnboardingStep {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STEP_ORDER
            .iter()
            .find(|step| step.to_string() == s)
            .copied()
            .ok_or_else(|| format!("Unknown onboarding step: {}", s))
    }
}

/// Derived status of a step. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Locked,
    Available,
    InProgress,
    Completed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "locked"),
            Self::Available => write!(f, "available"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}
