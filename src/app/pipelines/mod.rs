pub mod control_m;
pub mod jcap_pa;

pub use control_m::ControlMPipeline;
pub use jcap_pa::JcapPaPipeline;
