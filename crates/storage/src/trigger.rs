//! Shared persistence for cluster-wide repeating triggers.
//!
//! A [`TriggerRecord`] lives in the same store every process shares. Whoever
//! wants to act on a due trigger must first replace the exact record it read
//! with its advanced successor; [`TriggerStore::replace`] is a
//! compare-and-set, so for any one scheduled instant only one replacement can
//! succeed and every other contender sees [`StorageError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
};

const TRIGGER_PREFIX: &str = "triggers/";

/// State of one repeating trigger.
///
/// Timestamps are stored with millisecond precision, so a record read back
/// re-serializes to identical bytes and can serve as a CAS expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerRecord {
    /// Cluster-wide trigger name.
    pub name: String,
    /// Next instant the trigger is due.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub next_fire_at: DateTime<Utc>,
    /// Milliseconds between consecutive fires.
    pub interval_ms: u64,
    /// Repeats allowed after the first fire; `None` repeats forever.
    pub repeat_count: Option<u64>,
    /// Fires claimed so far, plus boundaries skipped by a misfire.
    pub times_fired: u64,
    /// Paused triggers keep their schedule but never fire.
    pub paused: bool,
    /// When the last fire was claimed.
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Instance that claimed the last fire.
    pub last_fired_by: Option<String>,
}

impl TriggerRecord {
    /// Creates an unpaused trigger first due at `first_fire_at`.
    pub fn new(
        name: impl Into<String>,
        first_fire_at: DateTime<Utc>,
        interval_ms: u64,
        repeat_count: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            next_fire_at: truncate_to_millis(first_fire_at),
            interval_ms,
            repeat_count,
            times_fired: 0,
            paused: false,
            last_fired_at: None,
            last_fired_by: None,
        }
    }

    /// Returns `true` once every allowed repeat has fired.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.repeat_count.is_some_and(|repeats| self.times_fired > repeats)
    }

    /// Returns `true` when the trigger is due at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.paused && !self.is_complete() && now >= self.next_fire_at
    }

    /// Builds the successor record for a fire claimed at `now`.
    ///
    /// On time, the cadence is kept (`next_fire_at + interval`). When the
    /// fire is more than `misfire_threshold` late, the trigger is rescheduled
    /// from `now`, and every boundary skipped since `next_fire_at` counts
    /// against the repeat count as if it had fired.
    ///
    /// # Errors
    ///
    /// [`StorageError::Internal`] if the next fire instant is out of range.
    pub fn fired(
        &self,
        now: DateTime<Utc>,
        misfire_threshold: Duration,
        by: &str,
    ) -> StorageResult<Self> {
        let out_of_range = || {
            StorageError::internal(format!(
                "trigger {} cannot be rescheduled {} ms after {now}",
                self.name, self.interval_ms
            ))
        };
        let interval = millis(self.interval_ms).ok_or_else(out_of_range)?;
        let misfired = self.is_misfire(now, misfire_threshold);
        let base = if misfired { now } else { self.next_fire_at };
        let next = base
            .checked_add_signed(interval)
            .filter(|next| *next > now)
            .or_else(|| now.checked_add_signed(interval))
            .ok_or_else(out_of_range)?;

        let skipped = if misfired { self.boundaries_missed(now) } else { 0 };
        Ok(Self {
            next_fire_at: truncate_to_millis(next),
            times_fired: self.times_fired.saturating_add(1).saturating_add(skipped),
            last_fired_at: Some(truncate_to_millis(now)),
            last_fired_by: Some(by.to_owned()),
            ..self.clone()
        })
    }

    /// Whole intervals that elapsed between `next_fire_at` and `now`.
    fn boundaries_missed(&self, now: DateTime<Utc>) -> u64 {
        let late_ms = u64::try_from((now - self.next_fire_at).num_milliseconds()).unwrap_or(0);
        late_ms.checked_div(self.interval_ms).unwrap_or(0)
    }

    /// Returns `true` when `now` is later than the due instant by more than
    /// `misfire_threshold`.
    #[must_use]
    pub fn is_misfire(&self, now: DateTime<Utc>, misfire_threshold: Duration) -> bool {
        now - self.next_fire_at > misfire_threshold
    }
}

fn millis(ms: u64) -> Option<Duration> {
    i64::try_from(ms).ok().and_then(Duration::try_milliseconds)
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// Persistence for [`TriggerRecord`]s.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Loads the trigger called `name`.
    async fn load(&self, name: &str) -> StorageResult<Option<TriggerRecord>>;

    /// Stores `record` unless a trigger with the same name exists.
    ///
    /// Returns `Ok(false)` when one already does.
    async fn create(&self, record: &TriggerRecord) -> StorageResult<bool>;

    /// Replaces `current` with `next` if the stored record still equals
    /// `current`.
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`] when another writer changed it first.
    async fn replace(&self, current: &TriggerRecord, next: &TriggerRecord) -> StorageResult<()>;
}

/// [`TriggerStore`] over any [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct BackendTriggerStore<B> {
    backend: B,
}

impl<B: StorageBackend> BackendTriggerStore<B> {
    /// Wraps `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn key(name: &str) -> Vec<u8> {
        format!("{TRIGGER_PREFIX}{name}").into_bytes()
    }
}

#[async_trait]
impl<B: StorageBackend> TriggerStore for BackendTriggerStore<B> {
    #[tracing::instrument(skip(self))]
    async fn load(&self, name: &str) -> StorageResult<Option<TriggerRecord>> {
        self.backend
            .get(&Self::key(name))
            .await?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(StorageError::from))
            .transpose()
    }

    #[tracing::instrument(skip(self, record), fields(trigger = %record.name))]
    async fn create(&self, record: &TriggerRecord) -> StorageResult<bool> {
        match self.backend.compare_and_set_json(&Self::key(&record.name), None, record).await {
            Ok(()) => Ok(true),
            Err(StorageError::Conflict) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self, current, next), fields(trigger = %current.name))]
    async fn replace(&self, current: &TriggerRecord, next: &TriggerRecord) -> StorageResult<()> {
        if current.name != next.name {
            return Err(StorageError::internal("a trigger cannot be renamed"));
        }
        self.backend.compare_and_set_json(&Self::key(&current.name), Some(current), next).await
    }
}
