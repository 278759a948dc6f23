//! Background expiration sweeper.
//!
//! One sweep walks a snapshot of the region's memory keys with quiet
//! lookups, removes expired elements from memory, and demotes elements idle
//! longer than `max_memory_idle_time_seconds` to the spool queue, up to
//! `max_spool_per_run` per sweep.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::element::{Expiry, now_millis};
use crate::error::{Error, Result};
use crate::event::{CacheEventKind, ElementEventType};
use crate::key::CacheKey;
use crate::region::Region;

/// Sweeper state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    Idle,
    Scanning,
}

const IDLE: u8 = 0;
const SCANNING: u8 = 1;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Keys looked at.
    pub checked: usize,
    pub expired_max_life: usize,
    pub expired_idle: usize,
    /// Idle elements demoted to the spool queue.
    pub spooled: usize,
    /// Keys that disappeared between the snapshot and the lookup.
    pub vanished: usize,
    /// The spool budget ran out and the sweep stopped early.
    pub budget_exhausted: bool,
    /// Another sweep was already running; nothing was done.
    pub skipped: bool,
}

impl SweepReport {
    pub fn expired(&self) -> usize {
        self.expired_max_life + self.expired_idle
    }
}

/// Resets the state to idle when a sweep ends, panics included.
struct ScanGuard<'a>(&'a AtomicU8);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(IDLE, Ordering::Release);
    }
}

/// Expiration sweeper bound to one region.
///
/// Holds the region weakly: a dropped region ends the sweeper.
pub struct ExpirationSweeper<K: CacheKey, V: Send + Sync + 'static> {
    region: Weak<Region<K, V>>,
    name: Arc<str>,
    state: AtomicU8,
}

impl<K, V> ExpirationSweeper<K, V>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    pub fn new(region: &Arc<Region<K, V>>) -> Self {
        Self {
            region: Arc::downgrade(region),
            name: Arc::from(region.name()),
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn state(&self) -> SweeperState {
        match self.state.load(Ordering::Acquire) {
            SCANNING => SweeperState::Scanning,
            _ => SweeperState::Idle,
        }
    }

    /// Run one sweep now.
    ///
    /// Fails with [`Error::Disposed`] once the region is gone or disposed.
    pub fn run_once(&self) -> Result<SweepReport> {
        let region = self
            .region
            .upgrade()
            .filter(|region| region.is_alive())
            .ok_or_else(|| Error::Disposed(self.name.to_string()))?;

        if self
            .state
            .compare_exchange(IDLE, SCANNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        }
        let _guard = ScanGuard(&self.state);

        let report = sweep(&region, now_millis());
        debug!(
            region = %self.name,
            checked = report.checked,
            expired = report.expired(),
            spooled = report.spooled,
            vanished = report.vanished,
            budget_exhausted = report.budget_exhausted,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Run a sweep every `period` on the Tokio runtime.
    ///
    /// The first sweep happens one period after the call. Missed ticks are
    /// delayed, never bunched. A panicking sweep is logged and the schedule
    /// continues.
    pub fn spawn(self, period: Duration) -> SweeperHandle {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match catch_unwind(AssertUnwindSafe(|| self.run_once())) {
                    Ok(Ok(_)) => {}
                    Ok(Err(Error::Disposed(_))) => {
                        debug!(region = %self.name, "Region gone, sweeper stopping");
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!(region = %self.name, error = %e, "Sweep failed");
                    }
                    Err(_) => {
                        error!(region = %self.name, "Sweep panicked, continuing on next tick");
                    }
                }
            }
        });
        SweeperHandle {
            token,
            task: Some(task),
        }
    }
}

fn sweep<K, V>(region: &Region<K, V>, now: i64) -> SweepReport
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    let memory = region.memory();
    let idle_limit_ms = region
        .config()
        .max_memory_idle_time()
        .map(|limit| i64::try_from(limit.as_millis()).unwrap_or(i64::MAX));
    let budget = region.config().spool_budget();

    let mut report = SweepReport::default();
    for key in memory.key_set() {
        report.checked += 1;
        let Some(element) = memory.get_quiet(&key) else {
            report.vanished += 1;
            continue;
        };
        let attributes = element.attributes();

        if !attributes.is_eternal() {
            let event = match attributes.check_expiry(now) {
                Expiry::Fresh => None,
                Expiry::MaxLifeExceeded => {
                    report.expired_max_life += 1;
                    Some(ElementEventType::ExceededMaxLifeBackground)
                }
                Expiry::IdleTimeExceeded => {
                    report.expired_idle += 1;
                    Some(ElementEventType::ExceededIdleTimeBackground)
                }
            };
            if let Some(event) = event {
                region.emit_for(CacheEventKind::Element(event), &key);
                memory.remove_exact(&key);
                continue;
            }
        }

        let Some(limit) = idle_limit_ms else {
            continue;
        };
        if attributes.idle_millis(now) <= limit {
            continue;
        }
        if budget.is_some_and(|budget| report.spooled >= budget) {
            report.budget_exhausted = true;
            break;
        }
        if region.demote(&key) {
            report.spooled += 1;
            if budget.is_some_and(|budget| report.spooled >= budget) {
                report.budget_exhausted = true;
                break;
            }
        }
    }
    report
}

/// Handle to a spawned sweeper. Dropping it cancels the sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel and wait for the task to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
