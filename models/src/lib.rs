pub mod admission;
pub mod constants;
pub mod node;
pub mod pod;
pub mod telemetry;
