//! RSS 2.0 feed over the first-seen history.

use crate::ansi::html_escape;
use crate::cache::PkgHistoryItem;
use chrono::{TimeZone, Utc};

/// Number of items included in the feed, newest first.
const FEED_LEN: usize = 25;

/// Render the new-packages feed.
pub fn render_feed(items: &[PkgHistoryItem], base_url: &str) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push('\n');
    out.push_str(r#"<rss version="2.0"><channel>"#);
    out.push_str("<title>Nim package directory</title>");
    out.push_str(&format!("<link>{}</link>", html_escape(base_url)));
    out.push_str("<description>New packages in the Nim package directory</description>");

    for item in items.iter().rev().take(FEED_LEN) {
        let date = Utc
            .timestamp_opt(item.first_seen_time, 0)
            .single()
            .map(|d| d.to_rfc2822())
            .unwrap_or_default();
        let name = html_escape(&item.name);
        out.push_str("<item>");
        out.push_str(&format!("<title>{}</title>", name));
        out.push_str(&format!(
            "<link>{}/pkg/{}</link>",
            html_escape(base_url),
            name
        ));
        out.push_str(&format!("<guid>{}/pkg/{}</guid>", html_escape(base_url), name));
        out.push_str(&format!("<pubDate>{}</pubDate>", date));
        out.push_str("</item>");
    }

    out.push_str("</channel></rss>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, t: i64) -> PkgHistoryItem {
        PkgHistoryItem {
            name: name.to_string(),
            first_seen_time: t,
        }
    }

    #[test]
    fn test_feed_structure() {
        let feed = render_feed(&[item("foo", 1700000000)], "http://example.org");
        assert!(feed.starts_with("<?xml"));
        assert!(feed.contains("<rss version=\"2.0\">"));
        assert!(feed.contains("<title>foo</title>"));
        assert!(feed.contains("http://example.org/pkg/foo"));
        assert!(feed.ends_with("</channel></rss>"));
    }

    #[test]
    fn test_feed_newest_first() {
        let feed = render_feed(
            &[item("older", 1), item("newer", 2)],
            "http://example.org",
        );
        let older = feed.find("<title>older</title>").unwrap();
        let newer = feed.find("<title>newer</title>").unwrap();
        assert!(newer < older);
    }

    #[test]
    fn test_feed_truncates() {
        let items: Vec<_> = (0..100).map(|i| item(&format!("p{}", i), i)).collect();
        let feed = render_feed(&items, "http://example.org");
        assert_eq!(feed.matches("<item>").count(), FEED_LEN);
        // The newest item is present, the oldest is not.
        assert!(feed.contains("<title>p99</title>"));
        assert!(!feed.contains("<title>p0</title>"));
    }

    #[test]
    fn test_feed_escapes_names() {
        let feed = render_feed(&[item("a<b", 1)], "http://example.org");
        assert!(feed.contains("a&lt;b"));
        assert!(!feed.contains("a<b<"));
    }

    #[test]
    fn test_feed_dates_are_rfc2822() {
        let feed = render_feed(&[item("foo", 1700000000)], "http://example.org");
        assert!(feed.contains("<pubDate>Tue, 14 Nov 2023"));
    }
}
