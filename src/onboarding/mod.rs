//! Onboarding progression: gated steps a new employee completes in order.
//!
//! NDA, required reading, a training video and a quiz are followed by a
//! notification, a two-party equipment handoff and a terminal completion.
//! Step status is derived from the persisted aggregate on every read; the
//! engine is the only writer.

pub mod engine;
pub mod gates;
pub mod handoff;
pub mod machine;
pub mod model;
pub mod quiz;
pub mod routes;
pub mod step;

pub use engine::{
    ClientVideoCache, NdaSubmission, OnboardingEngine, OnboardingOverview, ProgressSummary,
    QuizResult, ResumePoint, SeekResult,
};
pub use model::{AuditAction, AuditEntry, ProgressAggregate};
pub use quiz::{Answer, Answers};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use step::{OnboardingStep, StepStatus};
