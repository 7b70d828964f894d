//! Detection pipeline: classification, per-group workers and scheduling

pub mod evaluator;
pub mod scheduler;
pub mod worker;

pub use evaluator::{alert_severity, classify, evaluate, is_small_distribution, Evaluation};
pub use scheduler::{partition, Collaborators, CycleReport, Scheduler};
pub use worker::{AccountFailure, GroupReport, Worker, WorkerDeps};
