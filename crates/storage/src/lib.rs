#![forbid(unsafe_code)]

pub mod repository;

pub use repository::{
    DeckSource, InMemoryDeckSource, InMemoryProgressStore, ProgressRepository, StorageError,
    VersionedProgress,
};
