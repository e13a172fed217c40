//! Keyed read cache with request de-duplication
//!
//! Every remote read in the portals goes through one [`QueryCache`]. Keys
//! are hierarchical segment lists and values are cached as JSON; staleness
//! comes from prefix invalidation rather than eviction.
//!
//! # Entry Lifecycle
//!
//! | State | Served | Description |
//! |-------|--------|-------------|
//! | Empty | nothing | First access awaits the loader |
//! | Fresh | value | No fetch until invalidated or past the window |
//! | Stale | value | Served immediately while a refetch runs |
//! | Failed | value or error | Last error kept alongside any older value |

mod entry;

pub mod key;
pub mod store;

pub use key::CacheKey;
pub use store::{AuthListener, MutationOptions, QueryCache, QueryOptions, QueryResult};
