//! Upstream manifest poller.
//!
//! Re-fetches the upstream manifest on a fixed period, diffs it against the
//! loaded store, appends newly discovered names to the first-seen history,
//! rewrites the local mirror file, and reloads the store (which atomically
//! rebuilds every derived index). Failures are per-tick: an error is logged
//! and the loop continues.

use crate::cache;
use crate::error::{DirError, Result};
use crate::manifest::ManifestStore;
use crate::normalize::normalize;
use crate::state::SharedState;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Outcome of one poller tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Upstream bytes matched the local mirror; nothing changed.
    Unchanged,
    /// The mirror was rewritten and the store reloaded.
    Reloaded { new_packages: usize },
}

/// Make sure a local mirror exists, fetching it from upstream on first run.
pub async fn ensure_local_manifest(shared: &SharedState, client: &reqwest::Client) -> Result<()> {
    let path = &shared.config.packages_file;
    if path.exists() {
        return Ok(());
    }
    info!(url = %shared.config.upstream_url, "no local manifest, fetching upstream");
    let bytes = fetch_upstream(shared, client).await?;
    cache::write_atomic(path, &bytes)?;
    Ok(())
}

/// Run the poller forever at the configured period.
pub async fn run(shared: SharedState, client: reqwest::Client) {
    let mut interval = tokio::time::interval(shared.config.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match tick(&shared, &client).await {
            Ok(TickOutcome::Unchanged) => debug!("manifest poll: upstream unchanged"),
            Ok(TickOutcome::Reloaded { new_packages }) => {
                info!(new_packages, "manifest poll: mirror refreshed")
            }
            Err(e) => warn!(error = %e, "manifest poll failed"),
        }
    }
}

/// One poller tick.
pub async fn tick(shared: &SharedState, client: &reqwest::Client) -> Result<TickOutcome> {
    let bytes = fetch_upstream(shared, client).await?;

    let local = std::fs::read(&shared.config.packages_file).unwrap_or_default();
    if bytes == local {
        let count = shared.lock().manifest.len();
        debug!(packages = count, "upstream matches local mirror");
        return Ok(TickOutcome::Unchanged);
    }

    // Names present upstream, before the store is replaced.
    let parsed: Vec<Value> = serde_json::from_slice(&bytes)?;
    let upstream_names: Vec<String> = parsed
        .iter()
        .filter_map(|v| v.get("name").and_then(Value::as_str))
        .map(normalize)
        .collect();

    let now = Utc::now().timestamp();
    let new_packages = {
        let mut state = shared.lock();
        let mut added = 0;
        for name in &upstream_names {
            if !state.manifest.contains(name) && state.history.add(name, now) {
                info!(pkg = %name, "new package discovered upstream");
                added += 1;
            }
        }
        cache::save_history(&shared.config.cache_file, &state.history)?;
        added
    };

    cache::write_atomic(&shared.config.packages_file, &bytes)?;

    // Reload outside the lock, publish under it: readers see either the
    // old snapshot or the new one, never a half-rebuilt index.
    let store = ManifestStore::load_file(&shared.config.packages_file)?;
    {
        let mut state = shared.lock();
        state.manifest = store;
        for item in &state.history.pkgs_history {
            if !state.manifest.contains(&item.name) {
                debug!(pkg = %item.name, "package no longer in upstream manifest");
            }
        }
    }

    Ok(TickOutcome::Reloaded { new_packages })
}

async fn fetch_upstream(shared: &SharedState, client: &reqwest::Client) -> Result<Vec<u8>> {
    let response = client.get(&shared.config.upstream_url).send().await?;
    if !response.status().is_success() {
        return Err(DirError::NetworkMessage(format!(
            "failed to fetch upstream manifest: HTTP {}",
            response.status()
        )));
    }
    Ok(response.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{test_config, AppState, State};
    use std::net::SocketAddr;
    use tempfile::tempdir;

    /// Serve fixed bytes over HTTP from an ephemeral port.
    async fn serve_bytes(body: &'static str) -> SocketAddr {
        use axum::routing::get;
        let app = axum::Router::new().route("/packages.json", get(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn make_state(root: &std::path::Path, upstream_url: String) -> SharedState {
        let mut config = test_config(root);
        config.upstream_url = upstream_url;
        AppState::new(config, State::default())
    }

    const UPSTREAM: &str = r#"[{"name": "Baz", "tags": ["new"], "description": "fresh package"}]"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tick_discovers_new_package() {
        let dir = tempdir().unwrap();
        let addr = serve_bytes(UPSTREAM).await;
        let shared = make_state(
            dir.path(),
            format!("http://{}/packages.json", addr),
        );
        std::fs::write(&shared.config.packages_file, "[]").unwrap();

        let client = reqwest::Client::new();
        let outcome = tick(&shared, &client).await.unwrap();
        assert_eq!(outcome, TickOutcome::Reloaded { new_packages: 1 });

        let state = shared.lock();
        assert!(state.manifest.contains("baz"));
        assert_eq!(state.history.pkgs_history.len(), 1);
        assert_eq!(state.history.pkgs_history[0].name, "baz");
        drop(state);

        // Mirror rewritten and history persisted.
        let mirror = std::fs::read_to_string(&shared.config.packages_file).unwrap();
        assert!(mirror.contains("Baz"));
        assert!(shared.config.cache_file.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_tick_is_noop() {
        let dir = tempdir().unwrap();
        let addr = serve_bytes(UPSTREAM).await;
        let shared = make_state(
            dir.path(),
            format!("http://{}/packages.json", addr),
        );
        std::fs::write(&shared.config.packages_file, "[]").unwrap();

        let client = reqwest::Client::new();
        tick(&shared, &client).await.unwrap();
        let history_before = shared.lock().history.pkgs_history.clone();

        let outcome = tick(&shared, &client).await.unwrap();
        assert_eq!(outcome, TickOutcome::Unchanged);
        assert_eq!(shared.lock().history.pkgs_history, history_before);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_seen_recorded_once_across_changes() {
        let dir = tempdir().unwrap();
        let addr = serve_bytes(UPSTREAM).await;
        let shared = make_state(
            dir.path(),
            format!("http://{}/packages.json", addr),
        );
        // Local mirror differs but already contains baz under another
        // spelling, and history already knows it.
        std::fs::write(
            &shared.config.packages_file,
            r#"[{"name": "old", "tags": [], "description": ""}]"#,
        )
        .unwrap();
        shared.lock().history.add("baz", 1);

        let client = reqwest::Client::new();
        let outcome = tick(&shared, &client).await.unwrap();
        assert_eq!(outcome, TickOutcome::Reloaded { new_packages: 0 });
        let state = shared.lock();
        assert_eq!(state.history.pkgs_history.len(), 1);
        assert_eq!(state.history.pkgs_history[0].first_seen_time, 1);
    }

    #[tokio::test]
    async fn test_tick_failure_leaves_state_untouched() {
        let dir = tempdir().unwrap();
        let shared = make_state(dir.path(), "http://127.0.0.1:1/packages.json".to_string());
        std::fs::write(&shared.config.packages_file, "[]").unwrap();

        let client = reqwest::Client::new();
        assert!(tick(&shared, &client).await.is_err());
        let state = shared.lock();
        assert!(state.manifest.is_empty());
        assert!(state.history.pkgs_history.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ensure_local_manifest_fetches_when_missing() {
        let dir = tempdir().unwrap();
        let addr = serve_bytes(UPSTREAM).await;
        let shared = make_state(
            dir.path(),
            format!("http://{}/packages.json", addr),
        );
        let client = reqwest::Client::new();
        ensure_local_manifest(&shared, &client).await.unwrap();
        assert!(shared.config.packages_file.exists());

        // Second call leaves the file alone.
        std::fs::write(&shared.config.packages_file, "sentinel").unwrap();
        ensure_local_manifest(&shared, &client).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&shared.config.packages_file).unwrap(),
            "sentinel"
        );
    }
}
