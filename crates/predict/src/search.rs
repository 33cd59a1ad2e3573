//! Query execution against the shared index.

mod seeker;

pub use seeker::{seek_index_data, SeekResult, Seeker};
