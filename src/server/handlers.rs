//! HTTP handlers for the directory's web UI, JSON API, badges, and feeds.
//!
//! Handlers only take the state lock for short read or transition sections;
//! anything that waits (build completion, subprocesses) happens through the
//! orchestrator's own suspension points.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use tracing::instrument;

use crate::ansi::{ansi_to_html, html_escape};
use crate::badge;
use crate::builder;
use crate::manifest::{self, PkgManifestEntry};
use crate::normalize::normalize;
use crate::query;
use crate::rss;
use crate::signing;
use crate::state::SharedState;

use super::error::{html_error, ApiError};
use super::types::*;

/// Signature header checked by the update endpoint.
const SIGNATURE_HEADER: &str = "x-minisign-signature";

/// Cache-busting headers attached to every badge response.
fn badge_headers() -> [(header::HeaderName, &'static str); 4] {
    [
        (header::CONTENT_TYPE, "image/svg+xml"),
        (
            header::CACHE_CONTROL,
            "no-cache, no-store, must-revalidate, max-age=0",
        ),
        (header::EXPIRES, "0"),
        (header::PRAGMA, "no-cache"),
    ]
}

/// Shared HTML page skeleton.
fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        concat!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\">",
            "<title>{title} - Nim package directory</title></head>",
            "<body><h1>{title}</h1>{body}",
            "<hr><p><a href=\"/\">home</a> | <a href=\"/packages.xml\">rss</a></p>",
            "</body></html>"
        ),
        title = html_escape(title),
        body = body,
    ))
}

/// GET `/` - most viewed packages and the latest arrivals.
#[instrument(skip(state))]
pub async fn home(State(state): State<SharedState>) -> Html<String> {
    let (top, newest, builds, count) = {
        let s = state.lock();
        let top = query::top_queried(&s, 5);
        let newest: Vec<_> = s
            .history
            .pkgs_history
            .iter()
            .rev()
            .take(10)
            .cloned()
            .collect();
        let builds = query::build_history_snapshot(&s);
        (top, newest, builds, s.manifest.len())
    };

    let mut body = format!(
        "<p>{} packages indexed.</p><form action=\"/search\"><input name=\"query\"><button>Search</button></form>",
        count
    );
    body.push_str("<h2>Most viewed</h2><ul>");
    for (name, views) in top {
        body.push_str(&format!(
            "<li><a href=\"/pkg/{0}\">{0}</a> ({1} views)</li>",
            html_escape(&name),
            views
        ));
    }
    body.push_str("</ul><h2>New packages</h2><ul>");
    for item in newest {
        body.push_str(&format!(
            "<li><a href=\"/pkg/{0}\">{0}</a></li>",
            html_escape(&item.name)
        ));
    }
    body.push_str("</ul><h2>Recent builds</h2><ul>");
    for name in builds.building.iter().chain(builds.waiting.iter()) {
        body.push_str(&format!(
            "<li><a href=\"/pkg/{0}\">{0}</a> (in progress)</li>",
            html_escape(name)
        ));
    }
    for item in builds.history.iter().take(10) {
        body.push_str(&format!(
            "<li><a href=\"/pkg/{0}\">{0}</a> ({1} / docs {2})</li>",
            html_escape(&item.name),
            item.build_status,
            item.doc_build_status,
        ));
    }
    body.push_str("</ul>");
    page("Packages", &body)
}

/// GET `/search?query=...`
#[instrument(skip(state), fields(query = %params.query))]
pub async fn search_page(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Html<String> {
    let results = {
        let s = state.lock();
        query::search_packages(&s, &params.query)
    };
    tracing::debug!(results = results.len(), "package search complete");

    let body = if results.is_empty() {
        "<p>No packages matched.</p>".to_string()
    } else {
        let mut b = String::from("<ul>");
        for (name, score) in &results {
            b.push_str(&format!(
                "<li><a href=\"/pkg/{0}\">{0}</a> (score {1})</li>",
                html_escape(name),
                score
            ));
        }
        b.push_str("</ul>");
        b
    };
    page(&format!("Search: {}", params.query), &body)
}

/// GET `/pkg/{name}` - package page; queues a refresh build as a side
/// effect and bumps the view counter.
#[instrument(skip(state), fields(pkg = %name))]
pub async fn package_page(State(state): State<SharedState>, Path(name): Path<String>) -> Response {
    if let Err(e) = builder::request(&state, &name, false) {
        return html_error(StatusCode::BAD_REQUEST, &e.to_string());
    }

    let (entry, meta) = {
        let mut s = state.lock();
        query::record_view(&mut s, &name);
        let entry = s.manifest.get(&name).cloned();
        let meta = s.pkgs_doc_files.get(&normalize(&name)).cloned();
        (entry, meta)
    };
    let Some(entry) = entry else {
        return html_error(
            StatusCode::BAD_REQUEST,
            &format!("Package '{}' not found", name),
        );
    };

    let mut body = format!(
        "<p>{}</p><p>License: {} | <a href=\"{}\">repository</a></p>",
        html_escape(&entry.description),
        html_escape(&entry.license),
        html_escape(&entry.url),
    );
    body.push_str("<p>Tags:");
    for tag in &entry.tags {
        body.push_str(&format!(" <code>{}</code>", html_escape(tag)));
    }
    body.push_str("</p>");
    if let Some(version) = &entry.github_latest_version {
        body.push_str(&format!("<p>Latest version: {}</p>", html_escape(version)));
    }
    if let Some(meta) = meta {
        body.push_str(&format!(
            "<p>Build: {} | Docs: {} | <a href=\"/docs/{}\">documentation</a></p>",
            meta.build_status,
            meta.doc_build_status,
            html_escape(&entry.name),
        ));
    }
    body.push_str(&format!(
        "<p><img src=\"/ci/badges/{0}/version.svg\"> <img src=\"/ci/badges/{0}/nimdevel/status.svg\"> <img src=\"/ci/badges/{0}/nimdevel/docstatus.svg\"></p>",
        html_escape(&entry.name)
    ));
    page(&entry.name, &body).into_response()
}

/// GET `/docs/{name}` - queue a build if needed, wait for it to settle,
/// then list the generated files.
#[instrument(skip(state), fields(pkg = %name))]
pub async fn docs_page(State(state): State<SharedState>, Path(name): Path<String>) -> Response {
    if let Err(e) = builder::request(&state, &name, false) {
        return html_error(StatusCode::BAD_REQUEST, &e.to_string());
    }
    let timeout = state.config.build_timeout;
    let finished = builder::wait_completion(&state, &name, timeout).await;

    let meta = {
        let s = state.lock();
        s.pkgs_doc_files.get(&normalize(&name)).cloned()
    };
    let Some(meta) = meta else {
        return html_error(
            StatusCode::BAD_REQUEST,
            &format!("Package '{}' not found", name),
        );
    };

    if !finished {
        return page(
            &format!("Docs: {}", name),
            "<p>The build is still running; refresh in a little while.</p>",
        )
        .into_response();
    }

    let mut body = format!(
        "<p>Build: {} | Docs: {} | <a href=\"/ci/badges/{}/nimdevel/output.html\">install transcript</a></p>",
        meta.build_status,
        meta.doc_build_status,
        html_escape(&name),
    );
    if meta.fnames.is_empty() {
        body.push_str("<p>No documentation was generated.</p>");
    } else {
        body.push_str("<ul>");
        for f in &meta.fnames {
            body.push_str(&format!(
                "<li><a href=\"/docs/{}/{}\">{}</a></li>",
                html_escape(&name),
                html_escape(f),
                html_escape(f)
            ));
        }
        body.push_str("</ul>");
    }
    page(&format!("Docs: {}", name), &body).into_response()
}

/// GET `/docs/{name}/{*path}` - serve one generated doc file.
#[instrument(skip(state), fields(pkg = %name, path = %path))]
pub async fn doc_file(
    State(state): State<SharedState>,
    Path((name, path)): Path<(String, String)>,
) -> Response {
    if let Err(e) = validate_doc_path(&path) {
        return html_error(StatusCode::BAD_REQUEST, &e.to_string());
    }

    let key = normalize(&name);
    let pkg_dir = state.config.pkg_dir(&key);
    let root = match builder::find_package_root(&pkg_dir, &key) {
        Ok(r) => r,
        Err(e) => return html_error(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    match std::fs::read(root.join(&path)) {
        Ok(bytes) => {
            let content_type = if path.ends_with(".html") {
                "text/html; charset=utf-8"
            } else {
                "text/plain; charset=utf-8"
            };
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(_) => html_error(StatusCode::NOT_FOUND, "No such doc file"),
    }
}

/// Reject traversal and anything that is not a generated artifact, before
/// any filesystem access.
fn validate_doc_path(path: &str) -> crate::error::Result<()> {
    let ok_ext = path.ends_with(".html") || path.ends_with(".idx");
    let traversal = path.split('/').any(|seg| seg == ".." || seg.is_empty());
    if !ok_ext || traversal || path.starts_with('/') {
        return Err(crate::error::DirError::InvalidDocPath(path.to_string()));
    }
    Ok(())
}

/// GET `/ci/badges/{name}/version.svg`
#[instrument(skip(state))]
pub async fn version_badge(State(state): State<SharedState>, Path(name): Path<String>) -> Response {
    let version = {
        let s = state.lock();
        s.pkgs_doc_files
            .get(&normalize(&name))
            .map(|m| m.version.clone())
            .unwrap_or_else(|| "?".to_string())
    };
    (badge_headers(), badge::version_badge(&version)).into_response()
}

/// GET `/ci/badges/{name}/nimdevel/{artifact}` - status badges and
/// transcript pages under one route.
#[instrument(skip(state))]
pub async fn build_artifact(
    State(state): State<SharedState>,
    Path((name, artifact)): Path<(String, String)>,
) -> Response {
    let meta = {
        let s = state.lock();
        s.pkgs_doc_files.get(&normalize(&name)).cloned()
    };
    let status = meta.as_ref().map(|m| m.build_status).unwrap_or_default();
    let doc_status = meta
        .as_ref()
        .map(|m| m.doc_build_status)
        .unwrap_or_default();

    match artifact.as_str() {
        "status.svg" => (badge_headers(), badge::status_badge(status)).into_response(),
        "docstatus.svg" => (badge_headers(), badge::doc_status_badge(doc_status)).into_response(),
        "output.html" => {
            let transcript = meta.map(|m| m.build_output).unwrap_or_default();
            transcript_page(&name, "install output", &ansi_to_html(&transcript))
        }
        "doc_build_output.html" => {
            let mut body = String::new();
            for item in meta.map(|m| m.doc_build_output).unwrap_or_default() {
                body.push_str(&format!(
                    "<h3>{} ({})</h3><pre>{}</pre>",
                    html_escape(&item.filename),
                    if item.success { "ok" } else { "failed" },
                    ansi_to_html(&item.output),
                ));
            }
            transcript_page(&name, "doc build output", &body)
        }
        _ => html_error(StatusCode::NOT_FOUND, "No such build artifact"),
    }
}

fn transcript_page(name: &str, what: &str, inner: &str) -> Response {
    let style = concat!(
        "<style>pre{background:#1e1e1e;color:#d4d4d4;padding:1em}",
        ".ansi-bold{font-weight:bold}.ansi-red{color:#f44}.ansi-green{color:#4f4}",
        ".ansi-yellow{color:#ff4}.ansi-blue{color:#44f}.ansi-cyan{color:#4ff}",
        ".ansi-magenta{color:#f4f}</style>"
    );
    Html(format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{0}: {1}</title>{2}</head><body><h1>{0}: {1}</h1><pre>{3}</pre></body></html>",
        html_escape(name),
        what,
        style,
        inner,
    ))
    .into_response()
}

/// GET `/api/v1/package_count`
#[instrument(skip(state))]
pub async fn package_count(State(state): State<SharedState>) -> Json<usize> {
    Json(state.lock().manifest.len())
}

/// GET `/api/v1/status/{name}`
#[instrument(skip(state))]
pub async fn build_status(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Json<StatusResponse> {
    let key = normalize(&name);
    let s = state.lock();
    let waiting = s.waiting.contains(&key);
    let building = s.building.contains(&key);
    match s.pkgs_doc_files.get(&key) {
        Some(meta) => Json(StatusResponse {
            status: phase_of(waiting, building, Some(meta.build_status)),
            build_time: meta.build_time,
        }),
        None if waiting || building => Json(StatusResponse {
            status: phase_of(waiting, building, None),
            build_time: 0,
        }),
        None => Json(StatusResponse::unknown()),
    }
}

/// GET `/api/v1/search_symbol?symbol=...`
#[instrument(skip(state), fields(symbol = %params.symbol))]
pub async fn search_symbol(
    State(state): State<SharedState>,
    Query(params): Query<SymbolParams>,
) -> Json<ApiResponse<Vec<crate::symbols::PkgSymbol>>> {
    let results = {
        let s = state.lock();
        match &params.pkg {
            Some(pkg) => query::search_symbol_in_pkg(&s, pkg, &params.symbol),
            None => query::search_symbol(&s, &params.symbol),
        }
    };
    tracing::debug!(results = results.len(), "symbol search complete");
    Json(ApiResponse::new(results))
}

/// POST `/ci/rebuild/{name}` - force a rebuild regardless of expiry.
#[instrument(skip(state), fields(pkg = %name))]
pub async fn rebuild(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    let outcome = builder::request(&state, &name, true)?;
    tracing::info!(?outcome, "rebuild requested");
    Ok(Json(ApiResponse::new(format!("{:?}", outcome))))
}

/// POST `/update_package` - signature-verified manifest update.
///
/// The body is the raw JSON of one package entry; the detached minisign
/// signature comes in the `X-Minisign-Signature` header.
#[instrument(skip(state, headers, body))]
pub async fn update_package(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    let Some(public_key) = state.config.update_public_key.as_deref() else {
        return Err(ApiError::unavailable(
            "Package updates are disabled: no public key configured",
        ));
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing X-Minisign-Signature header"))?;

    signing::verify_signature(&body, signature, public_key)
        .map_err(|_| ApiError::bad_request("Update signature verification failed"))?;

    let submission: PkgManifestEntry = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Malformed package entry: {}", e)))?;
    if submission.name.is_empty() {
        return Err(ApiError::bad_request("Package entry has no name"));
    }
    let name = submission.name.clone();

    // The read-modify-write of the manifest file happens under the state
    // lock, serialized against the poller.
    {
        let mut s = state.lock();
        manifest::apply_update(&state.config.packages_file, submission)?;
        s.manifest = manifest::ManifestStore::load_file(&state.config.packages_file)?;
    }
    tracing::info!(pkg = %name, "manifest updated");
    Ok(Json(ApiResponse::new(name)))
}

/// GET `/packages.json` - the raw mirror file.
#[instrument(skip(state))]
pub async fn packages_json(State(state): State<SharedState>) -> Response {
    match std::fs::read(&state.config.packages_file) {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(_) => ApiError::unavailable("Manifest mirror not available yet").into_response(),
    }
}

/// GET `/packages.xml` - RSS feed of new packages.
#[instrument(skip(state))]
pub async fn packages_xml(State(state): State<SharedState>) -> Response {
    let feed = {
        let s = state.lock();
        rss::render_feed(&s.history.pkgs_history, &state.config.base_url)
    };
    ([(header::CONTENT_TYPE, "application/rss+xml")], feed).into_response()
}

/// GET `/robots.txt`
pub async fn robots() -> &'static str {
    "User-agent: *\nDisallow: /ci/\nDisallow: /docs/\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_doc_path_accepts_artifacts() {
        assert!(validate_doc_path("index.html").is_ok());
        assert!(validate_doc_path("src/foo.html").is_ok());
        assert!(validate_doc_path("theindex.idx").is_ok());
    }

    #[test]
    fn test_validate_doc_path_rejects_traversal() {
        assert!(validate_doc_path("../secrets.html").is_err());
        assert!(validate_doc_path("a/../../b.html").is_err());
        assert!(validate_doc_path("/etc/passwd.html").is_err());
        assert!(validate_doc_path("a//b.html").is_err());
    }

    #[test]
    fn test_validate_doc_path_rejects_other_extensions() {
        assert!(validate_doc_path("notes.txt").is_err());
        assert!(validate_doc_path("script.js").is_err());
        assert!(validate_doc_path("foo.nim").is_err());
        assert!(validate_doc_path("foo").is_err());
    }

    #[test]
    fn test_badge_headers_disable_caching() {
        let headers = badge_headers();
        assert!(headers
            .iter()
            .any(|(k, v)| *k == header::CACHE_CONTROL && v.contains("no-store")));
        assert!(headers
            .iter()
            .any(|(k, v)| *k == header::CONTENT_TYPE && *v == "image/svg+xml"));
    }
}
