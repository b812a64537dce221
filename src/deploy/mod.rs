// Deployment contract: container image, SparkApplication descriptor and their checks.

pub mod artifacts;
pub mod check;
pub mod image;
pub mod manifest;
