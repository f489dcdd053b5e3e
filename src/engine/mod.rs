//! Process execution layer
//!
//! - `executer`: run one command with a wall-clock limit, killing its process group
//! - `compiler`: build step on top of `executer`
//! - `workspace`: disposable per-check copies of the submission directory

pub mod compiler;
pub mod executer;
pub mod workspace;

pub use compiler::{compile, BuildResult};
pub use executer::{execute, ExecutionOutcome, ExecutionSpec, ExecutionStatus};
pub use workspace::{Fixture, Workspace};
