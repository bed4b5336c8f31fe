use chrono::{DateTime, Utc};

use flashky_core::{
    model::{DeckId, FlashcardId, LearnerId, Progress},
    scheduler,
    time::Clock,
};
use storage::repository::{DeckSource, ProgressRepository, StorageError};

use crate::error::LearnServiceError;

/// How many times a review's read-modify-write is retried after losing an
/// optimistic-version race before the conflict is surfaced to the caller.
const MAX_CONFLICT_RETRIES: u32 = 3;

//
// ─── DUE CARD ──────────────────────────────────────────────────────────────────
//

/// Scheduling info for the card a learner should review next.
///
/// This is the shape handed to outer layers (e.g. an HTTP router); card
/// content itself is owned by the deck/flashcard collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct DueCard {
    pub flashcard_id: FlashcardId,
    pub efactor: f64,
    pub last_review_date: Option<DateTime<Utc>>,
    pub next_review_date: DateTime<Utc>,
}

impl DueCard {
    fn from_progress(progress: &Progress) -> Self {
        Self {
            flashcard_id: progress.flashcard_id,
            efactor: progress.efactor,
            last_review_date: progress.last_review_date,
            next_review_date: progress.next_review_date,
        }
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Coordinates deck initialization, due-card selection, and review processing.
///
/// The service owns no state beyond its clock; deck membership and progress
/// records come in through injected repository traits, so the engine never
/// reaches into ambient storage.
pub struct LearnService {
    clock: Clock,
}

impl LearnService {
    /// Create a learn service using the real-time clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Clock::default(),
        }
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Current time according to the service's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Seed a progress record for every card in the deck the learner has
    /// not started yet.
    ///
    /// New records are immediately due (`next_review_date = now`) with the
    /// spec defaults. Idempotent: cards that already have a record are left
    /// untouched, and a `Conflict` from a racing create on another client
    /// is absorbed rather than surfaced.
    ///
    /// # Errors
    ///
    /// Returns `LearnServiceError::Storage` for unknown decks or repository
    /// failures.
    pub async fn initialize_deck(
        &self,
        learner_id: LearnerId,
        deck_id: DeckId,
        decks: &dyn DeckSource,
        progress: &dyn ProgressRepository,
    ) -> Result<(), LearnServiceError> {
        let now = self.now();

        for flashcard_id in decks.list_flashcard_ids(deck_id).await? {
            if progress.get(learner_id, flashcard_id).await?.is_some() {
                continue;
            }
            match progress
                .create(Progress::new(learner_id, flashcard_id, now))
                .await
            {
                Ok(_) | Err(StorageError::Conflict) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }

    /// The single most overdue card in the deck, or `None` if nothing is
    /// due right now.
    ///
    /// Candidates are restricted to records with `next_review_date <= now`;
    /// the earliest wins, with timestamp ties broken by flashcard id.
    /// Nothing due is a normal result, never an error.
    ///
    /// # Errors
    ///
    /// Returns `LearnServiceError::Storage` for unknown decks or repository
    /// failures.
    pub async fn next_due_card(
        &self,
        learner_id: LearnerId,
        deck_id: DeckId,
        decks: &dyn DeckSource,
        progress: &dyn ProgressRepository,
    ) -> Result<Option<DueCard>, LearnServiceError> {
        let flashcard_ids = decks.list_flashcard_ids(deck_id).await?;
        let due = progress
            .find_due(learner_id, &flashcard_ids, self.now())
            .await?;
        Ok(due.first().map(DueCard::from_progress))
    }

    /// When the learner's next card in this deck becomes available,
    /// regardless of whether anything is due right now.
    ///
    /// `None` only when the learner has no progress records for the deck
    /// at all.
    ///
    /// # Errors
    ///
    /// Returns `LearnServiceError::Storage` for unknown decks or repository
    /// failures.
    pub async fn next_due_date(
        &self,
        learner_id: LearnerId,
        deck_id: DeckId,
        decks: &dyn DeckSource,
        progress: &dyn ProgressRepository,
    ) -> Result<Option<DateTime<Utc>>, LearnServiceError> {
        let flashcard_ids = decks.list_flashcard_ids(deck_id).await?;
        let earliest = progress.find_earliest(learner_id, &flashcard_ids).await?;
        Ok(earliest.map(|p| p.next_review_date))
    }

    /// Apply a learner's review to a card and return the next due time.
    ///
    /// Quality is a continuous score in [0, 5]; fractional grades are
    /// accepted. A card with no record yet gets one lazily, so reviewing
    /// works even for decks that were never explicitly initialized. The
    /// read-modify-write goes through the store's versioned `update` and is
    /// retried a bounded number of times when another submission races on
    /// the same record.
    ///
    /// # Errors
    ///
    /// - `LearnServiceError::InvalidQuality` for scores outside [0, 5]
    /// - `LearnServiceError::Storage` with `StorageError::Conflict` once
    ///   retries are exhausted, or for other repository failures
    pub async fn submit_review(
        &self,
        learner_id: LearnerId,
        flashcard_id: FlashcardId,
        quality: f64,
        progress: &dyn ProgressRepository,
    ) -> Result<DateTime<Utc>, LearnServiceError> {
        if !(0.0..=5.0).contains(&quality) {
            return Err(LearnServiceError::InvalidQuality(quality));
        }

        let mut attempts = 0;
        loop {
            let mut record = match progress.get(learner_id, flashcard_id).await? {
                Some(record) => record,
                None => match progress
                    .create(Progress::new(learner_id, flashcard_id, self.now()))
                    .await
                {
                    Ok(record) => record,
                    // Another client created the record between our get and
                    // create; re-read and review that one.
                    Err(StorageError::Conflict) if attempts < MAX_CONFLICT_RETRIES => {
                        attempts += 1;
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                },
            };

            let next_review_date =
                scheduler::record_review(&mut record.progress, quality, self.now());

            match progress.update(record).await {
                Ok(_) => return Ok(next_review_date),
                Err(StorageError::Conflict) if attempts < MAX_CONFLICT_RETRIES => {
                    attempts += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Default for LearnService {
    fn default() -> Self {
        Self::new()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use flashky_core::model::INITIAL_EASE_FACTOR;
    use flashky_core::time::{fixed_clock, fixed_now};
    use std::sync::atomic::{AtomicU32, Ordering};
    use storage::repository::{InMemoryDeckSource, InMemoryProgressStore, VersionedProgress};

    fn learner() -> LearnerId {
        LearnerId::new(7)
    }

    fn deck() -> DeckId {
        DeckId::new(1)
    }

    fn build_world(card_ids: &[u64]) -> (LearnService, InMemoryDeckSource, InMemoryProgressStore) {
        let decks = InMemoryDeckSource::new();
        decks.insert_deck(deck(), card_ids.iter().copied().map(FlashcardId::new).collect());
        let service = LearnService::new().with_clock(fixed_clock());
        (service, decks, InMemoryProgressStore::new())
    }

    #[tokio::test]
    async fn initialize_deck_seeds_due_records() {
        let (service, decks, store) = build_world(&[1, 2, 3]);

        service
            .initialize_deck(learner(), deck(), &decks, &store)
            .await
            .unwrap();

        for id in 1..=3 {
            let record = store
                .get(learner(), FlashcardId::new(id))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.progress.next_review_date, fixed_now());
            assert_eq!(record.progress.efactor, INITIAL_EASE_FACTOR);
            assert_eq!(record.progress.repetition, 0);
            assert_eq!(record.progress.interval, None);
        }
    }

    #[tokio::test]
    async fn initialize_deck_twice_is_idempotent() {
        let (service, decks, store) = build_world(&[1, 2]);

        service
            .initialize_deck(learner(), deck(), &decks, &store)
            .await
            .unwrap();

        // Mutate one record so a second init would be observable.
        service
            .submit_review(learner(), FlashcardId::new(1), 4.0, &store)
            .await
            .unwrap();
        let after_review = store.get(learner(), FlashcardId::new(1)).await.unwrap();

        service
            .initialize_deck(learner(), deck(), &decks, &store)
            .await
            .unwrap();

        assert_eq!(
            store.get(learner(), FlashcardId::new(1)).await.unwrap(),
            after_review
        );
    }

    #[tokio::test]
    async fn initialize_deck_unknown_deck_errors() {
        let (service, decks, store) = build_world(&[1]);

        let err = service
            .initialize_deck(learner(), DeckId::new(99), &decks, &store)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LearnServiceError::Storage(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn next_due_card_returns_most_overdue() {
        let (service, decks, store) = build_world(&[1, 2]);
        let now = fixed_now();

        let mut older = Progress::new(learner(), FlashcardId::new(2), now);
        older.next_review_date = now - Duration::minutes(45);
        store.create(older).await.unwrap();
        store
            .create(Progress::new(learner(), FlashcardId::new(1), now))
            .await
            .unwrap();

        let due = service
            .next_due_card(learner(), deck(), &decks, &store)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(due.flashcard_id, FlashcardId::new(2));
        assert_eq!(due.next_review_date, now - Duration::minutes(45));
        assert_eq!(due.efactor, INITIAL_EASE_FACTOR);
        assert_eq!(due.last_review_date, None);
    }

    #[tokio::test]
    async fn next_due_card_none_when_nothing_due() {
        let (service, decks, store) = build_world(&[1]);

        let mut future = Progress::new(learner(), FlashcardId::new(1), fixed_now());
        future.next_review_date = fixed_now() + Duration::minutes(30);
        store.create(future).await.unwrap();

        let due = service
            .next_due_card(learner(), deck(), &decks, &store)
            .await
            .unwrap();
        assert!(due.is_none());
    }

    #[tokio::test]
    async fn next_due_date_looks_past_the_due_filter() {
        let (service, decks, store) = build_world(&[1]);
        let future = fixed_now() + Duration::minutes(30);

        let mut record = Progress::new(learner(), FlashcardId::new(1), fixed_now());
        record.next_review_date = future;
        store.create(record).await.unwrap();

        let date = service
            .next_due_date(learner(), deck(), &decks, &store)
            .await
            .unwrap();
        assert_eq!(date, Some(future));
    }

    #[tokio::test]
    async fn next_due_date_none_without_records() {
        let (service, decks, store) = build_world(&[1, 2]);

        let date = service
            .next_due_date(learner(), deck(), &decks, &store)
            .await
            .unwrap();
        assert_eq!(date, None);
    }

    #[tokio::test]
    async fn submit_review_rejects_out_of_range_quality() {
        let (service, _, store) = build_world(&[1]);

        for quality in [-0.1, 5.1, f64::NAN] {
            let err = service
                .submit_review(learner(), FlashcardId::new(1), quality, &store)
                .await
                .unwrap_err();
            assert!(matches!(err, LearnServiceError::InvalidQuality(_)));
        }
    }

    #[tokio::test]
    async fn submit_review_lazily_creates_record() {
        let (service, _, store) = build_world(&[1]);
        let now = fixed_now();

        let next = service
            .submit_review(learner(), FlashcardId::new(1), 4.0, &store)
            .await
            .unwrap();

        // First success on a brand-new card: 10-minute bootstrap interval.
        assert_eq!(next, now + Duration::minutes(10));

        let record = store
            .get(learner(), FlashcardId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.progress.repetition, 1);
        assert_eq!(record.progress.interval, Some(10));
        assert_eq!(record.progress.last_review_date, Some(now));
    }

    #[tokio::test]
    async fn submit_review_accepts_fractional_quality() {
        let (service, _, store) = build_world(&[1]);
        let now = fixed_now();

        let next = service
            .submit_review(learner(), FlashcardId::new(1), 2.5, &store)
            .await
            .unwrap();

        // quality < 3 is a failure regardless of the fraction
        assert_eq!(next, now + Duration::minutes(10));
        let record = store
            .get(learner(), FlashcardId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.progress.repetition, 0);
        assert_eq!(record.progress.incorrect_answers, 1);
    }

    /// Wraps the in-memory store and fails the next N `update` calls with
    /// `Conflict`, simulating a lost optimistic-version race.
    struct ConflictingStore {
        inner: InMemoryProgressStore,
        conflicts_left: AtomicU32,
    }

    impl ConflictingStore {
        fn new(inner: InMemoryProgressStore, conflicts: u32) -> Self {
            Self {
                inner,
                conflicts_left: AtomicU32::new(conflicts),
            }
        }
    }

    #[async_trait]
    impl ProgressRepository for ConflictingStore {
        async fn get(
            &self,
            learner_id: LearnerId,
            flashcard_id: FlashcardId,
        ) -> Result<Option<VersionedProgress>, StorageError> {
            self.inner.get(learner_id, flashcard_id).await
        }

        async fn create(&self, progress: Progress) -> Result<VersionedProgress, StorageError> {
            self.inner.create(progress).await
        }

        async fn update(
            &self,
            record: VersionedProgress,
        ) -> Result<VersionedProgress, StorageError> {
            if self
                .conflicts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::Conflict);
            }
            self.inner.update(record).await
        }

        async fn find_due(
            &self,
            learner_id: LearnerId,
            flashcard_ids: &[FlashcardId],
            at_or_before: DateTime<Utc>,
        ) -> Result<Vec<Progress>, StorageError> {
            self.inner.find_due(learner_id, flashcard_ids, at_or_before).await
        }

        async fn find_earliest(
            &self,
            learner_id: LearnerId,
            flashcard_ids: &[FlashcardId],
        ) -> Result<Option<Progress>, StorageError> {
            self.inner.find_earliest(learner_id, flashcard_ids).await
        }
    }

    #[tokio::test]
    async fn submit_review_retries_through_transient_conflicts() {
        let inner = InMemoryProgressStore::new();
        inner
            .create(Progress::new(learner(), FlashcardId::new(1), fixed_now()))
            .await
            .unwrap();
        let store = ConflictingStore::new(inner, 2);
        let service = LearnService::new().with_clock(fixed_clock());

        service
            .submit_review(learner(), FlashcardId::new(1), 4.0, &store)
            .await
            .unwrap();

        let record = store
            .get(learner(), FlashcardId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.progress.repetition, 1);
        assert_eq!(record.progress.correct_answers, 1);
    }

    #[tokio::test]
    async fn submit_review_surfaces_conflict_after_retry_budget() {
        let inner = InMemoryProgressStore::new();
        inner
            .create(Progress::new(learner(), FlashcardId::new(1), fixed_now()))
            .await
            .unwrap();
        let store = ConflictingStore::new(inner, MAX_CONFLICT_RETRIES + 1);
        let service = LearnService::new().with_clock(fixed_clock());

        let err = service
            .submit_review(learner(), FlashcardId::new(1), 4.0, &store)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LearnServiceError::Storage(StorageError::Conflict)
        ));

        // The losing submission must not have clobbered the record.
        let record = store
            .get(learner(), FlashcardId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.progress.repetition, 0);
    }
}
