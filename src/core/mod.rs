pub mod agent;
pub mod connector;
pub mod etl;
pub mod job;
pub mod notification;
pub mod runtime;
pub mod staging;

pub use crate::domain::ports::{Notifier, SecretSource, Storage, Warehouse, WarehouseProvider};
pub use crate::utils::error::Result;
