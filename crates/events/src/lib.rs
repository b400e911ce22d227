//! Event subsystem for Corvid — append-only `StreamStore` drivers and the
//! hot-swappable `EventRouter`.

pub mod file;
pub mod in_memory;
pub mod router;

pub use file::FileStreamStore;
pub use in_memory::InMemoryStreamStore;
pub use router::{
    DEFAULT_BUFFER_CAPACITY, EventBackendConfig, EventBackendKind, EventRouter,
};
