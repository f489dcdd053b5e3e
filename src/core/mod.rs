//! Shared value types and helpers

pub mod slug;
pub mod utils;
pub mod verdict;

pub use slug::Slug;
pub use verdict::CheckState;
