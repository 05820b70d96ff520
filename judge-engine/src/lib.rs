pub mod config;
pub mod error;
pub mod languages;
pub mod queue;
pub mod repository;
pub mod service;
pub mod worker;

pub use config::Config;
pub use error::JudgeError;
pub use repository::{MemorySubmissionStore, PgSubmissionStore, SubmissionStore};
pub use service::{JudgeService, ServiceStats};
pub use worker::{PoolStats, WorkerPool};
