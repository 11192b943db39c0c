use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tankmill_protocol::{
    BusyStatus, DepthRequest, Direction, MoveRequest, SpindleSpeedRequest, ToolRequest, BUSY_PATH,
    DEPTH_PATH, ESTOP_PATH, MOVE_PATH, STATUS_PATH, TOOL_PATH, TOOL_SPEED_PATH,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// The tank's motion controller.
///
/// Movement requests return as soon as the controller has accepted them;
/// use [`Actuator::query_busy`] to find out when the motion has finished.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn move_by(&self, direction: Direction, speed: f64, step: f64) -> anyhow::Result<()>;
    /// Positive `step` moves down.
    async fn set_depth(&self, step: f64, speed: f64) -> anyhow::Result<()>;
    async fn set_tool(&self, enable: bool, speed: Option<f64>) -> anyhow::Result<()>;
    async fn query_busy(&self) -> anyhow::Result<BusyStatus>;
    async fn emergency_stop(&self) -> anyhow::Result<()>;
    async fn check_connection(&self) -> anyhow::Result<()>;
}

/// A motion controller on the network, talking JSON over HTTP.
pub struct HttpActuator {
    base_url: String,
    client: Client,
}

impl HttpActuator {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url = if base_url.contains("://") {
            base_url.trim_end_matches('/').to_owned()
        } else {
            format!("http://{}", base_url.trim_end_matches('/'))
        };
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(HttpActuator { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> anyhow::Result<()> {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?
            .error_for_status()?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, timeout: Duration) -> anyhow::Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    // Only reads get retried. Retrying a movement request could move the
    // machine twice.
    async fn get_with_retry<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let mut sleep = Duration::from_millis(250);
        for _ in 0..4 {
            match self.get(path, STATUS_TIMEOUT).await {
                Ok(ret) => {
                    return Ok(ret);
                }
                Err(e) => {
                    log::warn!("connection error: {e:#}, retrying...");
                    tokio::time::sleep(sleep).await;
                    sleep *= 2;
                }
            }
        }
        self.get(path, STATUS_TIMEOUT).await
    }
}

#[async_trait]
impl Actuator for HttpActuator {
    async fn move_by(&self, direction: Direction, speed: f64, step: f64) -> anyhow::Result<()> {
        let req = MoveRequest {
            direction,
            speed: speed as f32,
            step: step as f32,
        };
        self.post(MOVE_PATH, &req).await
    }

    async fn set_depth(&self, step: f64, speed: f64) -> anyhow::Result<()> {
        self.post(DEPTH_PATH, &DepthRequest::new(step as f32, speed as f32))
            .await
    }

    async fn set_tool(&self, enable: bool, speed: Option<f64>) -> anyhow::Result<()> {
        self.post(TOOL_PATH, &ToolRequest { enable }).await?;
        if let (true, Some(rpm)) = (enable, speed) {
            self.post(TOOL_SPEED_PATH, &SpindleSpeedRequest::from_rpm(rpm))
                .await?;
        }
        Ok(())
    }

    async fn query_busy(&self) -> anyhow::Result<BusyStatus> {
        self.get(BUSY_PATH, STATUS_TIMEOUT).await
    }

    async fn emergency_stop(&self) -> anyhow::Result<()> {
        self.client
            .post(self.url(ESTOP_PATH))
            .send()
            .await
            .context("emergency stop request failed")?
            .error_for_status()?;
        Ok(())
    }

    async fn check_connection(&self) -> anyhow::Result<()> {
        let status: serde_json::Value = self.get_with_retry(STATUS_PATH).await?;
        log::info!("controller at {} reports {status}", self.base_url);
        Ok(())
    }
}
