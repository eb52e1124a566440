//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod error;
pub mod file_store;
pub mod http;
pub mod mirror;
pub mod telemetry;
