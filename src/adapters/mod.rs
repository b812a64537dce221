pub mod notify;
pub mod secrets;
pub mod storage;
pub mod warehouse;
