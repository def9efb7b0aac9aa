//! Cluster-wide periodic key rotation.
//!
//! Every instance runs a [`RotationScheduler`] against the same
//! [`TriggerStore`]. The shared [`TriggerRecord`] holds the schedule; an
//! instance that finds it due claims the fire by compare-and-set of the
//! exact record it read, and only the winner rotates. Losers observe
//! [`FireOutcome::LostRace`] and do nothing.
//!
//! A claimed fire whose rotation then fails is counted and logged; it is not
//! retried, and the next fire proceeds as scheduled. If the winning process
//! dies between claim and rotation, that fire is lost.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use keymint_storage::{TriggerRecord, TriggerStore};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::RotationConfig,
    error::{IssuerError, Result},
    lifecycle::KeyLifecycleManager,
};

/// Name of the shared rotation trigger.
pub const ROTATION_TRIGGER: &str = "signing-key-rotation";

/// What one [`RotationScheduler::evaluate`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// This instance claimed the fire and rotated.
    Fired {
        /// The new current key.
        kid: String,
        /// The fire was later than the misfire threshold.
        misfired: bool,
    },
    /// The trigger is not due yet.
    NotDue,
    /// The trigger is paused.
    Paused,
    /// Every allowed repeat has fired.
    Completed,
    /// Another instance claimed this fire.
    LostRace,
    /// This instance claimed the fire but rotation failed.
    Failed {
        /// Rendered error.
        message: String,
    },
}

/// Drives [`KeyLifecycleManager::rotate`] from the shared trigger.
pub struct RotationScheduler {
    lifecycle: Arc<KeyLifecycleManager>,
    triggers: Arc<dyn TriggerStore>,
    config: RotationConfig,
    instance_id: String,
    initial_delay: chrono::Duration,
    misfire_threshold: chrono::Duration,
    cancel_token: CancellationToken,
    poll_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    fires: AtomicU64,
    lost_races: AtomicU64,
    failures: AtomicU64,
}

impl std::fmt::Debug for RotationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationScheduler")
            .field("instance_id", &self.instance_id)
            .field("config", &self.config)
            .field("fires", &self.fires())
            .field("lost_races", &self.lost_races())
            .field("failures", &self.failures())
            .finish_non_exhaustive()
    }
}

impl RotationScheduler {
    /// Creates a scheduler. Nothing runs until [`register`](Self::register)
    /// and [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// [`IssuerError::Config`] if `config` does not validate.
    pub fn new(
        lifecycle: Arc<KeyLifecycleManager>,
        triggers: Arc<dyn TriggerStore>,
        config: RotationConfig,
    ) -> Result<Self> {
        config.validate()?;
        let initial_delay = chrono::Duration::milliseconds(
            i64::try_from(config.initial_delay_ms)
                .map_err(|_| IssuerError::config("initial_delay_ms out of range"))?,
        );
        let misfire_threshold = chrono::Duration::from_std(config.misfire_threshold)
            .map_err(|_| IssuerError::config("misfire_threshold out of range"))?;
        let instance_id =
            config.instance_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Self {
            lifecycle,
            triggers,
            config,
            instance_id,
            initial_delay,
            misfire_threshold,
            cancel_token: CancellationToken::new(),
            poll_handle: Mutex::new(None),
            fires: AtomicU64::new(0),
            lost_races: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    /// Name recorded in the trigger when this instance claims a fire.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Creates the shared trigger, first due `initial_delay_ms` after `now`,
    /// unless it already exists.
    ///
    /// An existing trigger keeps its schedule and fire count; only its
    /// interval, repeat count and paused flag are brought in line with this
    /// instance's configuration.
    ///
    /// # Errors
    ///
    /// - [`IssuerError::Config`] if the first fire would be out of range
    /// - [`IssuerError::Storage`] if the trigger store fails
    #[tracing::instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn register(&self, now: DateTime<Utc>) -> Result<TriggerRecord> {
        let first_fire_at = now.checked_add_signed(self.initial_delay).ok_or_else(|| {
            IssuerError::config("initial_delay_ms puts the first rotation out of range")
        })?;
        let mut record = TriggerRecord::new(
            ROTATION_TRIGGER,
            first_fire_at,
            self.config.interval_ms,
            self.config.repeat_count,
        );
        record.paused = !self.config.enabled;

        if self.triggers.create(&record).await? {
            tracing::info!(
                next_fire_at = %record.next_fire_at,
                paused = record.paused,
                "registered rotation trigger"
            );
            return Ok(record);
        }

        let interval_ms = self.config.interval_ms;
        let repeat_count = self.config.repeat_count;
        let paused = !self.config.enabled;
        self.update(|current| TriggerRecord { interval_ms, repeat_count, paused, ..current.clone() })
            .await
    }

    /// Fires the trigger if it is due at `now` and this instance wins the
    /// claim.
    ///
    /// # Errors
    ///
    /// [`IssuerError::NotFound`] if the trigger was never registered, or
    /// [`IssuerError::Storage`] if it cannot be read, rescheduled or
    /// claimed. A failed rotation is not an error; it is reported as
    /// [`FireOutcome::Failed`].
    #[tracing::instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn evaluate(&self, now: DateTime<Utc>) -> Result<FireOutcome> {
        let current = self.load().await?;
        if current.paused {
            return Ok(FireOutcome::Paused);
        }
        if current.is_complete() {
            return Ok(FireOutcome::Completed);
        }
        if !current.is_due(now) {
            return Ok(FireOutcome::NotDue);
        }

        let misfired = current.is_misfire(now, self.misfire_threshold);
        let claimed = current.fired(now, self.misfire_threshold, &self.instance_id)?;
        match self.triggers.replace(&current, &claimed).await {
            Ok(()) => {},
            Err(e) if e.is_conflict() => {
                self.lost_races.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    due_at = %current.next_fire_at,
                    "rotation fire claimed by another instance"
                );
                return Ok(FireOutcome::LostRace);
            },
            Err(e) => return Err(e.into()),
        }

        if misfired {
            tracing::warn!(
                due_at = %current.next_fire_at,
                next_fire_at = %claimed.next_fire_at,
                "rotation trigger misfired; firing now and rescheduling from now"
            );
        }
        self.fires.fetch_add(1, Ordering::Relaxed);

        match self.lifecycle.rotate().await {
            Ok(rotated) => Ok(FireOutcome::Fired { kid: rotated.kid, misfired }),
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %e,
                    next_fire_at = %claimed.next_fire_at,
                    "scheduled key rotation failed"
                );
                Ok(FireOutcome::Failed { message: e.to_string() })
            },
        }
    }

    /// Pauses the shared trigger for every instance.
    ///
    /// # Errors
    ///
    /// [`IssuerError::NotFound`] if the trigger was never registered, or
    /// [`IssuerError::Storage`] on store failure.
    #[tracing::instrument(skip(self))]
    pub async fn pause(&self) -> Result<TriggerRecord> {
        self.update(|current| TriggerRecord { paused: true, ..current.clone() }).await
    }

    /// Resumes the shared trigger. The schedule is left as it was, so an
    /// overdue trigger fires on the next evaluation.
    ///
    /// # Errors
    ///
    /// Same as [`pause`](Self::pause).
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self) -> Result<TriggerRecord> {
        self.update(|current| TriggerRecord { paused: false, ..current.clone() }).await
    }

    /// Starts polling the trigger every `poll_interval`.
    ///
    /// The task stops on [`shutdown`](Self::shutdown). A rotation that has
    /// started always runs to completion. Calling `start` twice has no
    /// effect.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.poll_handle.lock();
        if slot.is_some() {
            tracing::debug!("rotation scheduler already running");
            return;
        }

        let scheduler = Arc::clone(self);
        let token = self.cancel_token.clone();
        let poll_interval = self.config.poll_interval;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("rotation scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        scheduler.poll_once().await;
                    }
                }
            }
        }));
        tracing::info!(
            instance_id = %self.instance_id,
            poll_interval = ?poll_interval,
            "rotation scheduler started"
        );
    }

    /// Stops the polling task and waits for it to finish.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.poll_handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "rotation scheduler task panicked");
        }
    }

    /// Fires claimed by this instance.
    #[must_use]
    pub fn fires(&self) -> u64 {
        self.fires.load(Ordering::Relaxed)
    }

    /// Fires this instance found already claimed.
    #[must_use]
    pub fn lost_races(&self) -> u64 {
        self.lost_races.load(Ordering::Relaxed)
    }

    /// Claimed fires whose rotation failed.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Polling period of the background task.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    async fn poll_once(&self) {
        match self.evaluate(Utc::now()).await {
            Ok(FireOutcome::Fired { kid, misfired }) => {
                tracing::debug!(kid = %kid, misfired, "scheduled rotation completed");
            },
            Ok(_) => {},
            Err(e) => tracing::warn!(error = %e, "failed to evaluate rotation trigger"),
        }
    }

    async fn load(&self) -> Result<TriggerRecord> {
        self.triggers.load(ROTATION_TRIGGER).await?.ok_or_else(|| {
            IssuerError::NotFound(format!("trigger {ROTATION_TRIGGER} is not registered"))
        })
    }

    async fn update<F>(&self, change: F) -> Result<TriggerRecord>
    where
        F: Fn(&TriggerRecord) -> TriggerRecord + Send + Sync,
    {
        loop {
            let current = self.load().await?;
            let next = change(&current);
            if next == current {
                return Ok(current);
            }
            match self.triggers.replace(&current, &next).await {
                Ok(()) => return Ok(next),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
