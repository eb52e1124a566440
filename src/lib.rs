//! Teca: content storage and route fallback for host-addressed CMS trees.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
