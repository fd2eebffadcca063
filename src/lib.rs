//! Indexed-cache engine: a thin layer over a pluggable key-value [`store`]
//! that maintains secondary [`index`]es transparently on writes, answers
//! conjunctive queries through a cost-free [`planner`], and sequences index
//! maintenance around every primitive operation through a [`pipeline`] of
//! before/after hooks. See `SPEC_FULL.md` for the full design.

pub mod cache;
pub mod error;
pub mod index;
pub mod matcher;
pub mod pipeline;
pub mod planner;
pub mod store;
pub mod value;

pub use cache::{Cache, CacheConfig};
pub use error::{CacheError, CacheErrorKind, CacheResult};
pub use index::{IndexDef, IndexRegistry, PK_PLACEHOLDER};
pub use store::{MemoryStore, Store};
pub use value::{Entity, Query, QueryValue};
