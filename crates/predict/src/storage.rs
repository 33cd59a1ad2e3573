//! Membership storage: funnels of item ids and the item registry.
//!
//! - `funnel` - Sorted compact set of item ids under one funnel id
//! - `farm` - Funnel table plus reference-counted item store

mod farm;
mod funnel;

pub use farm::Farm;
pub use funnel::Funnel;
