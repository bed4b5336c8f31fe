#![forbid(unsafe_code)]

pub mod model;
pub mod scheduler;
pub mod time;

pub use model::{DeckId, FlashcardId, LearnerId, Progress};
pub use time::Clock;
