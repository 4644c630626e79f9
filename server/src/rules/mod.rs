//! Game rules applied on top of the store.

mod effective_stats;
mod progression;

pub use effective_stats::compute_effective_stats;
pub use progression::{level_up, sync_level};
