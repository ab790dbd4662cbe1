//! Background fetch coordination.
//!
//! Decides when a key's data is stale enough to refetch (once per local
//! calendar day) and guarantees at most one fetch in flight per key.

mod coordinator;
mod error;
mod staleness;

pub use coordinator::{
    BatchOutcome, DEFAULT_BOOKKEEPING_CAPACITY, FetchCoordinator, FetchOutcome, Fetcher,
};
pub use error::FetchError;
pub use staleness::is_stale;
