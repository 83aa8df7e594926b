//! Onboard Engine: gated employee onboarding progression.

pub mod audit;
pub mod config;
pub mod content;
pub mod error;
pub mod identity;
pub mod onboarding;
pub mod store;
