pub mod collector;
pub mod repository;
pub mod scheduler;
pub mod telemetry;
