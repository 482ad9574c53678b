//! Periodic status polling, used while no streaming channel is available
//! and for initial-state checks.

use crate::error::{Result, SyncError};
use crate::types::StatusReport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_attempts: 150,
        }
    }
}

/// What one polling tick produced. A tick error is data, not a loop
/// terminator.
#[derive(Debug, Clone)]
pub enum PollUpdate {
    Status(StatusReport),
    Error(String),
}

/// Where status reports come from. Production is HTTP; tests script one.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, resource_id: &str) -> Result<StatusReport>;
}

/// `GET {api_base}/api/status/{id}`.
pub struct HttpStatusSource {
    client: reqwest::Client,
    api_base: String,
}

impl HttpStatusSource {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch_status(&self, resource_id: &str) -> Result<StatusReport> {
        let url = format!(
            "{}/api/status/{}",
            self.api_base.trim_end_matches('/'),
            resource_id
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Http {
                status: status.as_u16(),
            });
        }
        Ok(response.json::<StatusReport>().await?)
    }
}

/// Cancellation handle for a polling loop. `stop` may be called any number
/// of times, including after the loop has already finished.
pub struct PollHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to wind down (after natural termination or
    /// `stop`).
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Spawns the polling loop. Every `interval` one status fetch runs and its
/// outcome is delivered to `on_update`; the loop ends on a terminal status
/// (`completed`/`failed`), after `max_attempts` ticks, or when the handle is
/// stopped.
pub fn start_polling<F>(
    source: Arc<dyn StatusSource>,
    resource_id: &str,
    mut on_update: F,
    config: PollConfig,
) -> PollHandle
where
    F: FnMut(PollUpdate) + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let resource_id = resource_id.to_string();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // the immediate first tick

        log::info!(
            "🔁 Polling '{}' every {:?} (max {} attempts)",
            resource_id,
            config.interval,
            config.max_attempts
        );

        for attempt in 1..=config.max_attempts {
            tokio::select! {
                _ = token.cancelled() => {
                    log::info!("🔁 Polling '{}' cancelled", resource_id);
                    return;
                }
                _ = ticker.tick() => {}
            }

            match source.fetch_status(&resource_id).await {
                Ok(report) => {
                    let terminal = report.is_terminal();
                    on_update(PollUpdate::Status(report));
                    if terminal {
                        log::info!(
                            "🔁 Polling '{}' reached terminal status after {} attempts",
                            resource_id,
                            attempt
                        );
                        return;
                    }
                }
                Err(e) => {
                    // Transient failures must not abort the loop
                    log::warn!("⚠️ Polling '{}' tick failed: {}", resource_id, e);
                    on_update(PollUpdate::Error(e.to_string()));
                }
            }
        }

        log::warn!(
            "🔁 Polling '{}' stopped after exhausting {} attempts",
            resource_id,
            config.max_attempts
        );
    });

    PollHandle { cancel, task }
}
