use std::error::Error as StdError;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use super::types::ProbeResult;
use crate::config::MonitoringConfig;

/// Performs one reachability check against a URL.
///
/// Probing never fails: a site that is down is an expected condition and is
/// reported as an error outcome inside the returned [`ProbeResult`].
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeResult;
}

/// Plain `GET` checker backed by a shared reqwest client.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Both timeouts are mandatory, an unbounded probe would pin a worker forever.
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self { client })
    }

    pub fn from_config(config: &MonitoringConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            Duration::from_secs(config.probe_timeout_seconds),
            Duration::from_secs(config.connect_timeout_seconds),
        )
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> ProbeResult {
        let start = Instant::now();

        // `send` resolves once the status line and headers are in, the body is never read
        match self.client.get(url).send().await {
            Ok(response) => {
                let latency = start.elapsed().as_millis() as u64;
                let status_code = response.status().as_u16();
                debug!(url, status_code, latency_ms = latency, "probe completed");
                ProbeResult::response(url, latency, status_code)
            }
            Err(e) => {
                let message = error_chain(&e);
                debug!(url, error = %message, "probe failed");
                ProbeResult::error(url, message)
            }
        }
    }
}

/// reqwest's top-level message hides the cause (DNS, refused, timeout), so join the chain.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
