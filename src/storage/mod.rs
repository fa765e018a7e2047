//! Storage seam: the [`Store`] trait the collector core writes through, plus
//! the in-memory reference backend.

pub mod memory;
pub mod traits;

pub use memory::InMemoryStore;
pub use traits::{collect_keys, Store, StoreError, TimeRange};
