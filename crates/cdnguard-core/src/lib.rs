//! # cdnguard
//!
//! Traffic abuse detection for CDN distributions across every account of
//! a multi-account organization.
//!
//! Each cycle compares the last period's requests and bytes of every
//! distribution against a trailing baseline, tracks consecutive violations
//! in a persistent counter, and sends deduplicated, severity-tiered alerts
//! to a messaging channel.
//!
//! ## Architecture
//!
//! - **Scheduler**: lists active accounts, partitions them into groups and
//!   runs groups under a bounded pool with an overall deadline
//! - **Worker**: batched metric query per account, per-metric evaluation,
//!   counter updates and dedup checks
//! - **Stores**: ttl-aware records over a key/value backend (memory or Redis)
//! - **Alerting**: bilingual rendering and bounded, retried delivery
//!
//! ## Quick Start
//!
//! ```bash
//! # Validate configuration
//! cdnguard config check
//!
//! # Run a single cycle and print the report
//! cdnguard once
//!
//! # Run every 15 minutes until interrupted
//! cdnguard run
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]

pub mod accounts;
pub mod alerting;
pub mod cache;
pub mod clock;
pub mod config;
pub mod counter;
pub mod detection;
pub mod error;
pub mod models;
pub mod retry;
pub mod sources;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{Dispatcher, MessageChannel};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::detection::{Collaborators, CycleReport, Scheduler};
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::sources::{MetricsSource, OrganizationSource};
    pub use crate::store::{KvStore, MemoryStore};
}
