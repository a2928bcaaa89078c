//! Model switch coordinator
//!
//! Issues a switch command, then polls the status endpoint until the backend
//! reports the requested profile running, reports an error, or the deadline
//! passes. The poll loop runs as one spawned task that owns both the interval
//! and the deadline; cancelling its token stops both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use vchat_core::{ModelCatalog, ModelStatus, Result, SwitchConfig, SwitchOutcome, VchatError};

use crate::{CatalogStore, StatusQuery, SwitchCommand};

struct ActiveSwitch {
    id: u64,
    cancel: CancellationToken,
    /// Set once the command is accepted and polling starts
    task: Option<JoinHandle<()>>,
}

struct SwitcherInner {
    status: Arc<dyn StatusQuery>,
    command: Arc<dyn SwitchCommand>,
    catalog: CatalogStore,
    config: SwitchConfig,
    active: Mutex<Option<ActiveSwitch>>,
    next_id: AtomicU64,
}

impl SwitcherInner {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSwitch>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, id: u64) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }
}

fn stop_switch(switch: ActiveSwitch) {
    switch.cancel.cancel();
    if let Some(task) = switch.task {
        task.abort();
    }
}

/// Coordinates profile switches. Clones share one coordinator.
#[derive(Clone)]
pub struct ModelSwitcher {
    inner: Arc<SwitcherInner>,
}

impl ModelSwitcher {
    pub fn new(
        status: Arc<dyn StatusQuery>,
        command: Arc<dyn SwitchCommand>,
        catalog: CatalogStore,
        config: SwitchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SwitcherInner {
                status,
                command,
                catalog,
                config,
                active: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.inner.catalog
    }

    /// Fetch the status endpoint and publish the result as the new snapshot
    pub async fn refresh(&self) -> Result<Arc<ModelCatalog>> {
        let fresh = self.inner.status.fetch_status().await?;
        Ok(self.inner.catalog.replace(fresh))
    }

    /// Switch the backend to `profile_id` and wait until it settles
    ///
    /// Any switch still in progress on this coordinator is cancelled first
    /// and resolves as `Superseded`.
    #[instrument(skip(self))]
    pub async fn switch_to(&self, profile_id: &str) -> SwitchOutcome {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut active = self.inner.lock_active();
            if let Some(prev) = active.replace(ActiveSwitch {
                id,
                cancel: cancel.clone(),
                task: None,
            }) {
                debug!(superseded = prev.id, "Cancelling previous switch");
                stop_switch(prev);
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => SwitchOutcome::Superseded,
            outcome = self.start(id, profile_id, &cancel) => outcome,
        };

        self.inner.release(id);
        info!(%outcome, "Switch settled");
        outcome
    }

    async fn start(&self, id: u64, profile_id: &str, cancel: &CancellationToken) -> SwitchOutcome {
        if self.already_active(profile_id).await {
            return SwitchOutcome::AlreadyActive {
                profile: profile_id.to_string(),
            };
        }

        let ack = match self.inner.command.request_switch(profile_id).await {
            Ok(ack) if ack.success => ack,
            Ok(ack) => return SwitchOutcome::Rejected { message: ack.message },
            Err(VchatError::SwitchRejected(message)) => return SwitchOutcome::Rejected { message },
            Err(e) => {
                return SwitchOutcome::Rejected {
                    message: e.to_string(),
                }
            }
        };

        if ack.switching_to.is_none() && ack.current_profile.as_deref() == Some(profile_id) {
            return SwitchOutcome::AlreadyActive {
                profile: profile_id.to_string(),
            };
        }

        info!(message = %ack.message, "Switch accepted");
        self.inner
            .catalog
            .mark(ModelStatus::Switching, Some(ack.message));

        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let target = profile_id.to_string();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let outcome = poll_until_settled(
                inner.status.as_ref(),
                &inner.catalog,
                &inner.config,
                &target,
                &task_cancel,
            )
            .await;
            inner.release(id);
            let _ = tx.send(outcome);
        });

        {
            let mut active = self.inner.lock_active();
            match active.as_mut() {
                Some(current) if current.id == id => current.task = Some(task),
                _ => task.abort(),
            }
        }

        rx.await.unwrap_or(SwitchOutcome::Superseded)
    }

    async fn already_active(&self, profile_id: &str) -> bool {
        if let Some(snapshot) = self.inner.catalog.current() {
            return snapshot.is_active(profile_id);
        }
        match self.refresh().await {
            Ok(snapshot) => snapshot.is_active(profile_id),
            Err(e) => {
                debug!(error = %e, "No status before switching");
                false
            }
        }
    }

    /// True while a switch is outstanding
    pub fn is_switching(&self) -> bool {
        self.inner.lock_active().is_some()
    }

    /// Abandon the outstanding switch without waiting for it
    pub fn cancel(&self) -> bool {
        let Some(prev) = self.inner.lock_active().take() else {
            return false;
        };
        stop_switch(prev);
        true
    }
}

async fn poll_until_settled(
    status: &dyn StatusQuery,
    catalog: &CatalogStore,
    config: &SwitchConfig,
    target: &str,
    cancel: &CancellationToken,
) -> SwitchOutcome {
    let period = config.poll_interval();
    let start = Instant::now();

    let deadline = sleep_until(start + config.timeout());
    tokio::pin!(deadline);
    let mut ticks = interval_at(start + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut polls = 0;
    let mut failures = 0;
    let mut unchanged = 0;
    let mut seen_switching = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return SwitchOutcome::Superseded,
            _ = &mut deadline => {
                warn!(polls, "Switch did not settle before the deadline");
                return SwitchOutcome::TimedOut { polls };
            }
            _ = ticks.tick() => {}
        }

        polls += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SwitchOutcome::Superseded,
            _ = &mut deadline => return SwitchOutcome::TimedOut { polls },
            result = status.fetch_status() => result,
        };

        let poll = match result {
            Ok(poll) => poll,
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "Status poll failed");
                if failures >= config.max_poll_failures {
                    return SwitchOutcome::Unreachable {
                        attempts: failures,
                        last_error: e.to_string(),
                    };
                }
                continue;
            }
        };
        failures = 0;

        let snapshot = catalog.publish_status(poll);
        debug!(polls, status = snapshot.status.as_str(), current = ?snapshot.current_profile, "Polled status");

        if !snapshot.status.is_terminal() {
            seen_switching |= snapshot.status == ModelStatus::Switching;
            continue;
        }

        if snapshot.status == ModelStatus::Error {
            return SwitchOutcome::Failed {
                message: snapshot
                    .message
                    .clone()
                    .unwrap_or_else(|| "backend reported an error".to_string()),
            };
        }

        let serving = snapshot.current_profile.as_deref().unwrap_or("none");
        if serving == target {
            return SwitchOutcome::Switched {
                profile: target.to_string(),
                polls,
            };
        }

        // The old instance may still be answering until the backend starts switching
        if seen_switching {
            return SwitchOutcome::Failed {
                message: format!("backend went back to serving '{}'", serving),
            };
        }
        unchanged += 1;
        if unchanged >= config.max_unchanged_polls {
            return SwitchOutcome::Failed {
                message: snapshot.message.clone().unwrap_or_else(|| {
                    format!("backend kept serving '{}' and never started switching", serving)
                }),
            };
        }
    }
}
