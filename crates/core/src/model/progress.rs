use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{FlashcardId, LearnerId};

/// Ease factor assigned to a card the first time a learner sees it.
pub const INITIAL_EASE_FACTOR: f64 = 2.5;

/// Per-(learner, flashcard) scheduling state.
///
/// Exactly one record exists per pair; the store enforces uniqueness.
/// Records are created by deck initialization (or lazily on first review)
/// and mutated only by the review processor.
///
/// # Fields
///
/// * `last_review_date` - UTC time of the most recent review; `None` before the first one
/// * `next_review_date` - when the card becomes due; creation time for unreviewed cards
/// * `interval` - minutes until the next due date; `None` before the first review
/// * `efactor` - ease factor controlling interval growth, floored at 1.3
/// * `repetition` - consecutive successful-recall counter, reset on failure
/// * `correct_answers` / `incorrect_answers` - cumulative tallies, not read by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub learner_id: LearnerId,
    pub flashcard_id: FlashcardId,
    pub last_review_date: Option<DateTime<Utc>>,
    pub next_review_date: DateTime<Utc>,
    pub interval: Option<i64>,
    pub efactor: f64,
    pub repetition: u32,
    pub correct_answers: u32,
    pub incorrect_answers: u32,
}

impl Progress {
    /// Creates a fresh record for a card the learner has never reviewed.
    ///
    /// The card is immediately due: `next_review_date` is set to `created_at`.
    #[must_use]
    pub fn new(learner_id: LearnerId, flashcard_id: FlashcardId, created_at: DateTime<Utc>) -> Self {
        Self {
            learner_id,
            flashcard_id,
            last_review_date: None,
            next_review_date: created_at,
            interval: None,
            efactor: INITIAL_EASE_FACTOR,
            repetition: 0,
            correct_answers: 0,
            incorrect_answers: 0,
        }
    }

    /// Returns true if the card is due at the given instant.
    #[must_use]
    pub fn is_due(&self, at: DateTime<Utc>) -> bool {
        self.next_review_date <= at
    }

    /// Returns true once the learner has reviewed this card at least once.
    #[must_use]
    pub fn has_been_reviewed(&self) -> bool {
        self.last_review_date.is_some()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
