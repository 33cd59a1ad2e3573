//! Query compilation and item matching.
//!
//! - `compiler` - JSON payload to validated `Query`
//! - `filter` - Predicates and conjunctive filter chains
//! - `projection` - Response field selection
//! - `value` - Numeric-aware JSON comparison and hashable scalar keys

mod compiler;
mod filter;
mod projection;
mod value;

pub use compiler::{Query, QueryCompiler};
pub use filter::{FilterChain, Predicate, ValueSet};
pub use projection::Projection;
pub use value::ScalarKey;
