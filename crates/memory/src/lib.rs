//! Memory subsystem for Corvid — pluggable `KVStore` drivers, the
//! hot-swappable `MemoryRouter`, and the rolling `MemorySummarizer`.

pub mod file;
pub mod in_memory;
pub mod router;
pub mod summarizer;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file::FileStore;
pub use in_memory::InMemoryStore;
pub use router::{HistoryFilter, MemoryBackendConfig, MemoryKind, MemoryRouter};
pub use summarizer::{MemorySummarizer, SUMMARY_HEADER, SummaryOutcome};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
