mod pending;
mod promotion;

pub use pending::PendingCache;
pub use promotion::{DEDUP_WINDOW_SECS, PromotionReport, promote};
