use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flashky_core::model::{DeckId, FlashcardId, LearnerId, Progress};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// A duplicate create or a lost optimistic-version race.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),
}

/// A progress record paired with its optimistic-concurrency version.
///
/// Reviews are read-modify-write cycles on a single record; the version
/// lets `update` detect that another writer got there first instead of
/// silently clobbering its changes.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedProgress {
    pub progress: Progress,
    pub version: u64,
}

/// Repository contract for the progress record store.
///
/// Uniqueness per (learner, flashcard) pair is the store's invariant:
/// `create` rejects duplicates with [`StorageError::Conflict`] rather than
/// relying on callers to check existence first.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Point lookup for one (learner, flashcard) pair.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure; absence is `Ok(None)`.
    async fn get(
        &self,
        learner_id: LearnerId,
        flashcard_id: FlashcardId,
    ) -> Result<Option<VersionedProgress>, StorageError>;

    /// Insert a fresh record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if a record already exists for the
    /// pair, or other storage errors.
    async fn create(&self, progress: Progress) -> Result<VersionedProgress, StorageError>;

    /// Write back a modified record, checking the version it was read at.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the stored version no longer
    /// matches, `StorageError::NotFound` if the record is missing.
    async fn update(&self, record: VersionedProgress) -> Result<VersionedProgress, StorageError>;

    /// Records due at or before the given instant, restricted to the given
    /// flashcards, ascending by `next_review_date` with ties broken by
    /// flashcard id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn find_due(
        &self,
        learner_id: LearnerId,
        flashcard_ids: &[FlashcardId],
        at_or_before: DateTime<Utc>,
    ) -> Result<Vec<Progress>, StorageError>;

    /// The earliest-scheduled record regardless of whether it is due yet.
    ///
    /// Same ordering as [`ProgressRepository::find_due`], no time filter.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure; absence is `Ok(None)`.
    async fn find_earliest(
        &self,
        learner_id: LearnerId,
        flashcard_ids: &[FlashcardId],
    ) -> Result<Option<Progress>, StorageError>;
}

/// Deck/flashcard collaborator boundary: which cards make up a deck.
#[async_trait]
pub trait DeckSource: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown deck.
    async fn list_flashcard_ids(&self, deck_id: DeckId) -> Result<Vec<FlashcardId>, StorageError>;
}

//
// ─── IN-MEMORY IMPLEMENTATIONS ─────────────────────────────────────────────────
//

type ProgressMap = HashMap<(LearnerId, FlashcardId), (Progress, u64)>;

/// In-memory progress store for testing and prototyping.
///
/// Versions start at 1 and bump on every successful write, which is enough
/// to exercise the same conflict paths a database-backed adapter would hit.
#[derive(Clone, Default)]
pub struct InMemoryProgressStore {
    records: Arc<Mutex<ProgressMap>>,
}

impl InMemoryProgressStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ProgressMap>, StorageError> {
        self.records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

fn sort_key(progress: &Progress) -> (DateTime<Utc>, FlashcardId) {
    (progress.next_review_date, progress.flashcard_id)
}

#[async_trait]
impl ProgressRepository for InMemoryProgressStore {
    async fn get(
        &self,
        learner_id: LearnerId,
        flashcard_id: FlashcardId,
    ) -> Result<Option<VersionedProgress>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .get(&(learner_id, flashcard_id))
            .map(|(progress, version)| VersionedProgress {
                progress: progress.clone(),
                version: *version,
            }))
    }

    async fn create(&self, progress: Progress) -> Result<VersionedProgress, StorageError> {
        let mut guard = self.lock()?;
        let key = (progress.learner_id, progress.flashcard_id);
        if guard.contains_key(&key) {
            return Err(StorageError::Conflict);
        }
        guard.insert(key, (progress.clone(), 1));
        Ok(VersionedProgress {
            progress,
            version: 1,
        })
    }

    async fn update(&self, record: VersionedProgress) -> Result<VersionedProgress, StorageError> {
        let mut guard = self.lock()?;
        let key = (record.progress.learner_id, record.progress.flashcard_id);
        let Some((stored, version)) = guard.get_mut(&key) else {
            return Err(StorageError::NotFound);
        };
        if *version != record.version {
            return Err(StorageError::Conflict);
        }
        *stored = record.progress.clone();
        *version += 1;
        Ok(VersionedProgress {
            progress: record.progress,
            version: *version,
        })
    }

    async fn find_due(
        &self,
        learner_id: LearnerId,
        flashcard_ids: &[FlashcardId],
        at_or_before: DateTime<Utc>,
    ) -> Result<Vec<Progress>, StorageError> {
        let guard = self.lock()?;
        let mut due: Vec<Progress> = flashcard_ids
            .iter()
            .filter_map(|id| guard.get(&(learner_id, *id)))
            .map(|(progress, _)| progress.clone())
            .filter(|progress| progress.next_review_date <= at_or_before)
            .collect();
        due.sort_by_key(sort_key);
        Ok(due)
    }

    async fn find_earliest(
        &self,
        learner_id: LearnerId,
        flashcard_ids: &[FlashcardId],
    ) -> Result<Option<Progress>, StorageError> {
        let guard = self.lock()?;
        Ok(flashcard_ids
            .iter()
            .filter_map(|id| guard.get(&(learner_id, *id)))
            .map(|(progress, _)| progress.clone())
            .min_by_key(sort_key))
    }
}

/// In-memory deck membership for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryDeckSource {
    decks: Arc<Mutex<HashMap<DeckId, Vec<FlashcardId>>>>,
}

impl InMemoryDeckSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a deck's flashcard membership.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn insert_deck(&self, deck_id: DeckId, flashcard_ids: Vec<FlashcardId>) {
        self.decks
            .lock()
            .expect("deck source lock poisoned")
            .insert(deck_id, flashcard_ids);
    }
}

#[async_trait]
impl DeckSource for InMemoryDeckSource {
    async fn list_flashcard_ids(&self, deck_id: DeckId) -> Result<Vec<FlashcardId>, StorageError> {
        let guard = self
            .decks
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.get(&deck_id).cloned().ok_or(StorageError::NotFound)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
