//! ANSI SGR tokenizer for rendering build transcripts as HTML.
//!
//! Build output arrives with raw terminal escapes from the toolchain. This
//! module tokenizes proper `ESC [ ... m` sequences and maps SGR codes to
//! CSS classes, instead of substring-replacing a fixed table (which
//! mis-fires on partial sequences). Non-SGR CSI sequences and dangling
//! escapes are dropped; everything else is HTML-escaped.

/// Translate a transcript with ANSI escapes into HTML `<span>` markup.
pub fn ansi_to_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut open_spans = 0usize;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            push_escaped(&mut out, c);
            continue;
        }
        // Only CSI sequences are recognized; a lone ESC is dropped.
        if chars.peek() != Some(&'[') {
            continue;
        }
        chars.next();

        // Collect parameter/intermediate bytes up to the final byte.
        let mut params = String::new();
        let mut final_byte = None;
        for c in chars.by_ref() {
            if ('\u{40}'..='\u{7e}').contains(&c) {
                final_byte = Some(c);
                break;
            }
            params.push(c);
        }

        // Truncated sequence at end of input, or a non-SGR final byte.
        if final_byte != Some('m') {
            continue;
        }

        let codes: Vec<u8> = if params.is_empty() {
            vec![0]
        } else {
            params
                .split(';')
                .map(|p| p.parse::<u8>().unwrap_or(0))
                .collect()
        };

        if codes.contains(&0) {
            close_all(&mut out, &mut open_spans);
            continue;
        }

        let classes: Vec<&str> = codes.iter().filter_map(|c| sgr_class(*c)).collect();
        if classes.is_empty() {
            continue;
        }
        out.push_str("<span class=\"");
        out.push_str(&classes.join(" "));
        out.push_str("\">");
        open_spans += 1;
    }

    close_all(&mut out, &mut open_spans);
    out
}

fn close_all(out: &mut String, open_spans: &mut usize) {
    for _ in 0..*open_spans {
        out.push_str("</span>");
    }
    *open_spans = 0;
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        _ => out.push(c),
    }
}

/// CSS class for one SGR code; None for codes without a rendering.
fn sgr_class(code: u8) -> Option<&'static str> {
    Some(match code {
        1 => "ansi-bold",
        2 => "ansi-dim",
        3 => "ansi-italic",
        4 => "ansi-underline",
        30 => "ansi-black",
        31 => "ansi-red",
        32 => "ansi-green",
        33 => "ansi-yellow",
        34 => "ansi-blue",
        35 => "ansi-magenta",
        36 => "ansi-cyan",
        37 => "ansi-white",
        90 => "ansi-bright-black",
        91 => "ansi-bright-red",
        92 => "ansi-bright-green",
        93 => "ansi-bright-yellow",
        94 => "ansi-bright-blue",
        95 => "ansi-bright-magenta",
        96 => "ansi-bright-cyan",
        97 => "ansi-bright-white",
        _ => return None,
    })
}

/// Escape plain text for embedding in HTML.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        push_escaped(&mut out, c);
    }
    out
}
