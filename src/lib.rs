//! Exercheck - local check runner and submission client for course exercises
//!
//! - `languages`: language adapters and detection
//! - `checks`: check specifications, loading, caching and the runner
//! - `engine`: process execution, builds and per-check workspaces
//! - `report`: human and JSON rendering
//! - `api`: the remote evaluation service and submission state machine

pub mod api;
pub mod checks;
pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod languages;
pub mod report;
