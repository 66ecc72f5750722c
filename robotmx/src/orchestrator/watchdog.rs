//! Sends the robot home if a standalone prepare is not followed up in time.
//!
//! `Idle -> Armed(deadline) -> Idle`. Arming replaces any pending deadline,
//! aborting clears it, and expiry homes the robot.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use shared_types::PreparedState;
use tokio::task::JoinHandle;

use super::state::ForegroundSlot;
use crate::hardware::SharedHardwareRobot;

struct Armed {
    deadline: DateTime<Utc>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    generation: u64,
    armed: Option<Armed>,
}

pub struct PrepareWatchdog {
    robot: SharedHardwareRobot,
    slot: ForegroundSlot,
    timeout: Duration,
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PrepareWatchdog {
    pub fn new(robot: SharedHardwareRobot, slot: ForegroundSlot, timeout: Duration) -> Self {
        Self {
            robot,
            slot,
            timeout,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start (or restart) the countdown.
    pub fn arm(&self) {
        let deadline = chrono::Duration::from_std(self.timeout)
            .ok()
            .and_then(|timeout| Utc::now().checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        let generation = inner.generation;
        if let Some(previous) = inner.armed.take() {
            previous.task.abort();
        }

        let task = tokio::spawn(expire(
            self.inner.clone(),
            generation,
            self.timeout,
            self.robot.clone(),
            self.slot.clone(),
        ));
        inner.armed = Some(Armed { deadline, task });
        tracing::info!(deadline = %deadline, "Prepare watchdog armed");
    }

    /// Cancel a pending countdown. No-op when idle.
    pub fn abort(&self) {
        let mut inner = lock(&self.inner);
        if let Some(armed) = inner.armed.take() {
            armed.task.abort();
            inner.generation += 1;
            tracing::info!("Prepare watchdog aborted");
        }
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.inner).armed.is_some()
    }

    pub fn prepared_state(&self) -> PreparedState {
        match &lock(&self.inner).armed {
            Some(armed) => PreparedState {
                prepared: true,
                deadline: Some(armed.deadline),
            },
            None => PreparedState::default(),
        }
    }
}

impl Drop for PrepareWatchdog {
    fn drop(&mut self) {
        if let Some(armed) = lock(&self.inner).armed.take() {
            armed.task.abort();
        }
    }
}

async fn expire(
    inner: Arc<Mutex<Inner>>,
    generation: u64,
    timeout: Duration,
    robot: SharedHardwareRobot,
    slot: ForegroundSlot,
) {
    tokio::time::sleep(timeout).await;
    {
        let mut inner = lock(&inner);
        if inner.generation != generation {
            return;
        }
        inner.armed = None;
    }

    // A foreground operation that started since arming owns the robot now.
    let Some(_permit) = slot.try_acquire() else {
        tracing::warn!("Prepare watchdog expired while robot busy, not sending home");
        return;
    };
    tracing::warn!(
        timeout_secs = timeout.as_secs(),
        "No operation followed prepare, sending robot home"
    );
    match robot.go_to_home().await {
        Ok(message) => tracing::info!(message = %message, "Robot sent home by watchdog"),
        Err(e) => tracing::error!(error = %e, "Watchdog failed to send robot home"),
    }
}
