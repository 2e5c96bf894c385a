use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::backend::{HttpBackend, RandomFaults, SharedBackend, SimulatedBackend};

pub(super) const CONFIG_FILE: &str = "jobchat_config.json";

const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) api_base_url: Option<String>,
    pub(super) disable_network: Option<bool>,
    pub(super) poll_interval_ms: Option<u64>,
    pub(super) request_timeout_ms: Option<u64>,
    // Simulated backend only.
    pub(super) simulated_latency_ms: Option<u64>,
    pub(super) simulated_failure_rate: Option<f64>,
    pub(super) mirror_cache: Option<bool>,
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    match read_app_config(&path) {
        Ok(Some(config)) => config,
        Ok(None) => AppConfig::default(),
        Err(e) => {
            tracing::warn!(err = format!("{e:#}"), "config unreadable; using defaults");
            AppConfig::default()
        }
    }
}

fn read_app_config(path: &Path) -> anyhow::Result<Option<AppConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let config = serde_json::from_slice::<AppConfig>(&bytes)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(config))
}

impl AppConfig {
    pub(super) fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.disable_network {
            return !disable;
        }
        std::env::var("JOBCHAT_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub(super) fn api_base_url(&self) -> Option<String> {
        std::env::var("JOBCHAT_API_URL")
            .ok()
            .or_else(|| self.api_base_url.clone())
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
    }

    pub(super) fn poll_interval(&self) -> Duration {
        let ms = self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS).max(1);
        Duration::from_millis(ms)
    }

    pub(super) fn request_timeout(&self) -> Duration {
        let ms = self
            .request_timeout_ms
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS)
            .max(1);
        Duration::from_millis(ms)
    }

    pub(super) fn mirror_enabled(&self) -> bool {
        self.mirror_cache == Some(true)
    }

    /// HTTP when the network is enabled and an API url is known; the in-memory
    /// backend otherwise.
    pub(super) fn build_backend(&self) -> SharedBackend {
        if self.network_enabled() {
            if let Some(url) = self.api_base_url() {
                tracing::info!(api = %url, "using http backend");
                let backend = match reqwest::Client::builder()
                    .timeout(self.request_timeout())
                    .build()
                {
                    Ok(client) => HttpBackend::with_client(client, url),
                    Err(e) => {
                        tracing::warn!(err = %e, "http client builder failed; using defaults");
                        HttpBackend::new(url)
                    }
                };
                return Arc::new(backend);
            }
        }
        let mut backend = SimulatedBackend::new();
        if let Some(ms) = self.simulated_latency_ms.filter(|ms| *ms > 0) {
            backend = backend.with_latency(Duration::from_millis(ms));
        }
        if let Some(rate) = self.simulated_failure_rate.filter(|r| *r > 0.0) {
            backend = backend.with_faults(Arc::new(RandomFaults::new(rate)));
        }
        tracing::info!("using simulated backend");
        Arc::new(backend)
    }
}
