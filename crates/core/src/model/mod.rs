mod ids;
mod progress;

pub use ids::{DeckId, FlashcardId, LearnerId, ParseIdError};
pub use progress::{INITIAL_EASE_FACTOR, Progress};
