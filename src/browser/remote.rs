//! Remote debugging endpoint discovery
//!
//! Order: cached endpoint younger than an hour, the user-configured host,
//! then localhost ports 9222-9229. The first endpoint that accepts a
//! connection wins.

use std::future::Future;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use crate::preferences::{self, PreferenceStore, keys};
use crate::utils::constants::REMOTE_DEBUG_PORTS;
use crate::utils::timeout::REMOTE_VERSION_TIMEOUT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSource {
    Cache,
    UserHost,
    AutoDiscovery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub websocket_url: String,
    pub source: EndpointSource,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    websocket_debugger_url: String,
}

/// Reduce user input such as `http://host:9222/` to `host:9222`
pub fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_string()
}

/// Ask `host:port/json/version` for the browser-level websocket URL
pub async fn fetch_version(client: &reqwest::Client, host: &str) -> Result<String> {
    let url = format!("http://{}/json/version", normalize_host(host));
    let response = client
        .get(&url)
        .timeout(REMOTE_VERSION_TIMEOUT)
        .send()
        .await
        .with_context(|| format!("No debugging endpoint at {url}"))?
        .error_for_status()?;
    let info: VersionInfo = response
        .json()
        .await
        .context("Malformed /json/version response")?;
    Ok(info.websocket_debugger_url)
}

/// Walk the discovery chain, connecting to each candidate in turn.
///
/// Only a successful `connect` ends the walk. A cached endpoint that fails
/// is dropped from the cache; a new success is cached for the next hour.
pub async fn connect_first<T, F, Fut>(
    prefs: &dyn PreferenceStore,
    client: &reqwest::Client,
    mut connect: F,
) -> Result<(T, RemoteEndpoint)>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures = Vec::new();

    if let Some(cached) = preferences::cached_endpoint(prefs, Utc::now()) {
        debug!(endpoint = %cached, "Trying cached remote endpoint");
        match connect(cached.clone()).await {
            Ok(conn) => {
                return Ok((
                    conn,
                    RemoteEndpoint {
                        websocket_url: cached,
                        source: EndpointSource::Cache,
                    },
                ));
            }
            Err(e) => {
                debug!(endpoint = %cached, error = %e, "Cached remote endpoint is stale");
                failures.push(format!("cache: {e:#}"));
                if let Err(e) = preferences::clear_endpoint(prefs) {
                    debug!(error = %e, "Could not clear stale endpoint cache");
                }
            }
        }
    }

    if let Some(host) = prefs.get_string(keys::REMOTE_BROWSER_HOST) {
        let websocket_url = if host.starts_with("ws://") || host.starts_with("wss://") {
            Ok(host.clone())
        } else {
            fetch_version(client, &host).await
        };
        match websocket_url {
            Ok(websocket_url) => match connect(websocket_url.clone()).await {
                Ok(conn) => {
                    let endpoint = RemoteEndpoint {
                        websocket_url,
                        source: EndpointSource::UserHost,
                    };
                    remember(prefs, &endpoint);
                    return Ok((conn, endpoint));
                }
                Err(e) => failures.push(format!("{host}: {e:#}")),
            },
            Err(e) => {
                debug!(host = %host, error = %e, "Configured remote host unreachable");
                failures.push(format!("{host}: {e:#}"));
            }
        }
    }

    for port in REMOTE_DEBUG_PORTS {
        let Ok(websocket_url) = fetch_version(client, &format!("127.0.0.1:{port}")).await else {
            continue;
        };
        info!(port, "Discovered local debugging endpoint");
        match connect(websocket_url.clone()).await {
            Ok(conn) => {
                let endpoint = RemoteEndpoint {
                    websocket_url,
                    source: EndpointSource::AutoDiscovery,
                };
                remember(prefs, &endpoint);
                return Ok((conn, endpoint));
            }
            Err(e) => failures.push(format!("port {port}: {e:#}")),
        }
    }

    Err(anyhow!(
        "No remote browser reachable (ports {}-{} tried){}",
        REMOTE_DEBUG_PORTS.start(),
        REMOTE_DEBUG_PORTS.end(),
        if failures.is_empty() {
            String::new()
        } else {
            format!(": {}", failures.join("; "))
        }
    ))
}

fn remember(prefs: &dyn PreferenceStore, endpoint: &RemoteEndpoint) {
    if let Err(e) = preferences::save_endpoint(prefs, &endpoint.websocket_url, Utc::now()) {
        debug!(error = %e, "Could not cache remote endpoint");
    }
}
