pub mod columnar;
pub mod error;
pub mod functions;
pub mod logger;
pub mod monitor;
pub mod validation;
