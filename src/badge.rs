//! Flat SVG status badges for README embedding.

use crate::ansi::html_escape;
use crate::cache::BuildStatus;

/// Approximate glyph width used to size badge halves.
const CHAR_W: u32 = 7;
/// Horizontal padding inside each half.
const PAD: u32 = 10;

/// Badge color for a build or doc-build state.
pub fn status_color(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Ok => "#4c1",
        BuildStatus::Failed | BuildStatus::Timeout => "#e05d44",
        BuildStatus::Running => "#dfb317",
        BuildStatus::Waiting => "#9f9f9f",
    }
}

/// Render a two-part label/value badge.
pub fn render(label: &str, value: &str, color: &str) -> String {
    let label_w = label.chars().count() as u32 * CHAR_W + PAD;
    let value_w = value.chars().count() as u32 * CHAR_W + PAD;
    let total = label_w + value_w;
    let label = html_escape(label);
    let value = html_escape(value);

    format!(
        concat!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{total}" height="20" role="img" aria-label="{label}: {value}">"##,
            r##"<linearGradient id="s" x2="0" y2="100%">"##,
            r##"<stop offset="0" stop-color="#bbb" stop-opacity=".1"/>"##,
            r##"<stop offset="1" stop-opacity=".1"/>"##,
            r##"</linearGradient>"##,
            r##"<rect width="{label_w}" height="20" fill="#555"/>"##,
            r##"<rect x="{label_w}" width="{value_w}" height="20" fill="{color}"/>"##,
            r##"<rect width="{total}" height="20" fill="url(#s)"/>"##,
            r##"<g fill="#fff" text-anchor="middle" font-family="Verdana,Geneva,DejaVu Sans,sans-serif" font-size="11">"##,
            r##"<text x="{label_mid}" y="14">{label}</text>"##,
            r##"<text x="{value_mid}" y="14">{value}</text>"##,
            r##"</g></svg>"##
        ),
        total = total,
        label = label,
        value = value,
        label_w = label_w,
        value_w = value_w,
        color = color,
        label_mid = label_w / 2,
        value_mid = label_w + value_w / 2,
    )
}

/// Version badge for a package.
pub fn version_badge(version: &str) -> String {
    let shown = if version.is_empty() { "?" } else { version };
    render("version", shown, "#007ec6")
}

/// Install-status badge.
pub fn status_badge(status: BuildStatus) -> String {
    render("nimble install", &status.to_string(), status_color(status))
}

/// Doc-build-status badge.
pub fn doc_status_badge(status: BuildStatus) -> String {
    render("docs", &status.to_string(), status_color(status))
}
