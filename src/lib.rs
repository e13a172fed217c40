//! Frontdesk data layer
//!
//! Shared data access and URL state for the studio admin and client
//! portals: error classification, a keyed query cache with request
//! de-duplication and prefix invalidation, and modal state carried in
//! URL query parameters.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod modal;
pub mod transport;

pub use cache::{AuthListener, CacheKey, MutationOptions, QueryCache, QueryOptions, QueryResult};
pub use error::{classify, classify_value, AppError, ErrorKind};
pub use modal::{ModalMode, ModalResolver, ModalState};
pub use transport::RawFailure;
