//! Data models for cdnguard

mod account;
mod alert;
mod metrics;

pub use account::*;
pub use alert::*;
pub use metrics::*;
