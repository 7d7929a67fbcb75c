//! Reachability checks of the external services an API depends on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tracing::{debug, warn};
use url::Url;

use crate::config::LinksSection;

/// Outcome of one check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The service answered
    Success,
    /// The service could not be reached
    Failure(String),
    /// No answer within the timeout
    Timeout,
}

impl LinkOutcome {
    /// Short name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure(_) => "failure",
            Self::Timeout => "timeout",
        }
    }
}

/// Result of checking one link
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkReport {
    /// Checked URL
    pub url: String,
    /// What happened
    pub outcome: LinkOutcome,
    /// Time spent, in milliseconds
    pub duration_ms: u64,
}

/// Way of checking that one URL is reachable
#[async_trait]
pub trait LinkTester: Send + Sync {
    /// Succeeds when the service behind `url` is reachable
    async fn reach(&self, url: &Url) -> anyhow::Result<()>;
}

/// Tester opening a TCP connection to the URL's host and port
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnect;

#[async_trait]
impl LinkTester for TcpConnect {
    async fn reach(&self, url: &Url) -> anyhow::Result<()> {
        let host = url.host_str().ok_or_else(|| anyhow::anyhow!("URL has no host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow::anyhow!("URL has no port and no known default"))?;
        TcpStream::connect((host, port)).await?;
        Ok(())
    }
}

/// Checks the configured links concurrently, each under its own timeout
pub struct LinkChecker {
    urls: RwLock<Vec<String>>,
    timeout: RwLock<Duration>,
    tester: Arc<dyn LinkTester>,
}

impl LinkChecker {
    /// Checker without links
    pub fn new(tester: Arc<dyn LinkTester>) -> Self {
        Self { urls: RwLock::new(Vec::new()), timeout: RwLock::new(Duration::from_secs(5)), tester }
    }

    /// Applies the `[links]` configuration
    pub fn configure(&self, links: &LinksSection) {
        *self.urls.write() = links.urls.clone();
        *self.timeout.write() = links.timeout();
    }

    /// Configured links
    pub fn urls(&self) -> Vec<String> {
        self.urls.read().clone()
    }

    /// Checks every link; never fails
    pub async fn check(&self) -> Vec<LinkReport> {
        let urls = self.urls();
        let timeout = *self.timeout.read();
        join_all(urls.into_iter().map(|url| self.check_one(url, timeout))).await
    }

    async fn check_one(&self, url: String, timeout: Duration) -> LinkReport {
        let started = Instant::now();
        let outcome = match Url::parse(&url) {
            Err(e) => LinkOutcome::Failure(format!("invalid URL: {e}")),
            Ok(parsed) => match tokio::time::timeout(timeout, self.tester.reach(&parsed)).await {
                Ok(Ok(())) => LinkOutcome::Success,
                Ok(Err(e)) => LinkOutcome::Failure(format!("{e:#}")),
                Err(_) => LinkOutcome::Timeout,
            },
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &outcome {
            LinkOutcome::Success => debug!(url = %url, duration_ms, "link reachable"),
            other => warn!(url = %url, duration_ms, outcome = other.as_str(), "link check failed"),
        }
        LinkReport { url, outcome, duration_ms }
    }
}
