pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod deploy;
pub mod domain;
pub mod utils;

pub use crate::adapters::storage::{AnyStorage, LocalStorage, S3Storage};
pub use crate::adapters::warehouse::{ConfiguredWarehouses, MemoryWarehouse, SeaOrmWarehouse};
pub use crate::config::{AgentArgs, JobConfig, Settings};
pub use crate::core::{agent::Agent, etl::EtlEngine, job::JobService};
pub use crate::domain::model::{Dataset, JobResult, JobStatus};
pub use crate::utils::error::{EtlError, Result};
