pub mod key;
pub mod overlay;
pub mod snapshot;

pub use key::balance_key;
pub use overlay::CacheOverlay;
pub use snapshot::{CachedBalance, parse_decimal};
