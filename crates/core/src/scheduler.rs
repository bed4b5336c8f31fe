use chrono::{DateTime, Duration, Utc};

use crate::model::Progress;

/// Floor for the ease factor; SM-2 never lets a card decay below this.
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// One day expressed in the scheduler's minute unit.
pub const MINUTES_IN_DAY: i64 = 1440;

/// Interval assigned after a failed recall, and after the first success.
pub const RELEARN_INTERVAL_MINUTES: i64 = 10;

//
// ─── EASE FACTOR ───────────────────────────────────────────────────────────────
//

/// Updates the ease factor from a review quality score.
///
/// Applies the SM-2 adjustment
/// `ef + (0.1 - (5 - q) * (0.08 + (5 - q) * 0.02))` and clamps the result
/// to [`MIN_EASE_FACTOR`]. Quality is a continuous value; fractional grades
/// such as 2.5 are accepted. No domain check happens here — callers decide
/// what range of `quality` they admit.
///
/// # Examples
///
/// ```
/// # use flashky_core::scheduler::update_efactor;
/// assert_eq!(update_efactor(2.5, 4.0), 2.5);
/// assert_eq!(update_efactor(0.0, 5.0), 1.3);
/// ```
#[must_use]
pub fn update_efactor(efactor: f64, quality: f64) -> f64 {
    let efactor = efactor + (0.1 - (5.0 - quality) * (0.08 + (5.0 - quality) * 0.02));
    efactor.max(MIN_EASE_FACTOR)
}

//
// ─── INTERVAL ──────────────────────────────────────────────────────────────────
//

/// Calculates the next review interval in minutes.
///
/// Short fixed steps bootstrap a new or reset card (10 minutes, then one
/// day); from the third consecutive success onward the interval grows
/// geometrically by the ease factor, truncated to whole minutes.
///
/// `repetition` is the post-increment count of consecutive successes;
/// `interval` and `efactor` are the values from *before* this review.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn next_interval(repetition: u32, interval: i64, efactor: f64) -> i64 {
    if repetition == 1 {
        return RELEARN_INTERVAL_MINUTES;
    }
    if repetition == 2 {
        return MINUTES_IN_DAY;
    }
    (interval as f64 * efactor) as i64
}

//
// ─── REVIEW PROCESSOR ──────────────────────────────────────────────────────────
//

/// Applies a single review to a progress record and returns the next due time.
///
/// Pure state transition; no I/O and no intrinsic error conditions.
/// The update order is load-bearing and must not be rearranged:
///
/// 1. On success (`quality >= 3`), `repetition` is incremented and the new
///    interval is computed with the **stale** ease factor.
/// 2. On failure, `repetition` resets to 0 and the interval drops to the
///    fixed [`RELEARN_INTERVAL_MINUTES`].
/// 3. The ease-factor update runs afterwards in both branches, so the
///    interval chosen for this review never sees the adjusted value.
///
/// A record whose `interval` is still unset while `repetition` is past the
/// bootstrap steps is treated as having a zero-minute previous interval.
pub fn record_review(progress: &mut Progress, quality: f64, now: DateTime<Utc>) -> DateTime<Utc> {
    if quality >= 3.0 {
        progress.repetition += 1;
        progress.interval = Some(next_interval(
            progress.repetition,
            progress.interval.unwrap_or(0),
            progress.efactor,
        ));
        progress.correct_answers += 1;
    } else {
        progress.repetition = 0;
        progress.interval = Some(RELEARN_INTERVAL_MINUTES);
        progress.incorrect_answers += 1;
    }

    progress.efactor = update_efactor(progress.efactor, quality);
    progress.last_review_date = Some(now);

    let minutes = progress.interval.unwrap_or(0);
    let next_review_date = now + Duration::minutes(minutes);
    progress.next_review_date = next_review_date;

    next_review_date
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
