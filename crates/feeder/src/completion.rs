//! Waiting for the controller to finish a motion.
//!
//! The controller has no completion notification, so we poll its busy flag.
//! The decision about what to do with each poll result is a pure function of
//! the result and the elapsed time, which keeps it testable without a clock.

use std::time::Duration;

use tankmill_protocol::BusyStatus;
use tokio::time::Instant;

use crate::connection::Actuator;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PollConfig {
    /// Delay between polls while the controller reports busy.
    pub interval: Duration,
    /// Delay before retrying after a failed poll.
    pub error_interval: Duration,
    /// Give up after waiting this long.
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            interval: Duration::from_millis(250),
            error_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    /// Still moving (or unknown); poll again after the given delay.
    Awaiting(Duration),
    Confirmed,
    TimedOut(String),
}

/// The state of one wait for completion.
pub struct CompletionWait {
    config: PollConfig,
    started: Instant,
}

impl CompletionWait {
    pub fn new(config: PollConfig) -> Self {
        CompletionWait {
            config,
            started: Instant::now(),
        }
    }

    /// How long the next poll may take before the wait is over.
    ///
    /// Never less than one poll interval, so a late idle answer still counts.
    pub fn remaining(&self) -> Duration {
        self.config
            .timeout
            .saturating_sub(self.started.elapsed())
            .max(self.config.interval)
    }

    pub fn observe(&self, polled: &anyhow::Result<BusyStatus>) -> Completion {
        self.observe_at(polled, self.started.elapsed())
    }

    pub fn observe_at(&self, polled: &anyhow::Result<BusyStatus>, elapsed: Duration) -> Completion {
        let limit = self.config.timeout.as_secs_f64();
        match polled {
            Ok(BusyStatus { busy: false }) => Completion::Confirmed,
            Ok(BusyStatus { busy: true }) if elapsed >= self.config.timeout => {
                Completion::TimedOut(format!("movement timed out after {limit}s"))
            }
            Err(e) if elapsed >= self.config.timeout => Completion::TimedOut(format!(
                "movement timed out after {limit}s after error: {e:#}"
            )),
            Ok(BusyStatus { busy: true }) => Completion::Awaiting(self.config.interval),
            Err(e) => {
                log::warn!("busy query failed: {e:#}");
                Completion::Awaiting(self.config.error_interval)
            }
        }
    }
}

/// Polls until the controller stops reporting busy.
pub async fn wait_for_completion(
    actuator: &dyn Actuator,
    config: PollConfig,
) -> anyhow::Result<()> {
    let wait = CompletionWait::new(config);
    loop {
        let polled = match tokio::time::timeout(wait.remaining(), actuator.query_busy()).await {
            Ok(polled) => polled,
            Err(_) => Err(anyhow::anyhow!("controller did not answer the busy query")),
        };
        match wait.observe(&polled) {
            Completion::Confirmed => return Ok(()),
            Completion::TimedOut(msg) => anyhow::bail!(msg),
            Completion::Awaiting(delay) => tokio::time::sleep(delay).await,
        }
    }
}
