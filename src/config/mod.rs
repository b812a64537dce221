pub mod cli;
pub mod job;
pub mod settings;

pub use cli::AgentArgs;
pub use job::{JobConfig, JobSource};
pub use settings::{ConnectionType, Settings};
