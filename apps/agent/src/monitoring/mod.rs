//! Monitoring engine: target model, probe implementations, and the
//! single-flight scheduler that drives them.

pub mod checker;
pub mod scheduler;
pub mod types;

pub use checker::CheckerSet;
pub use scheduler::Scheduler;
pub use types::{HealthCheckResult, ResolvedTarget, TargetSpec};
