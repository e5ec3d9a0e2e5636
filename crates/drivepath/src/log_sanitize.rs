//! Scrubbing of remote response text before it reaches logs or error messages.

const MAX_BODY_CHARS: usize = 1024;
const REDACTED: &str = "[redacted]";

// Keys whose values are credentials when echoed back in a response or URL.
const SECRET_KEYS: &[&str] = &["access_token", "refresh_token", "client_secret", "key"];

#[derive(Clone, Copy)]
enum Escape {
    Start,
    Csi,
    Osc,
    OscEsc,
}

/// Strip terminal control sequences, fold all whitespace runs to one space,
/// redact credentials, and cap the result length.
pub fn sanitize_remote_text(input: &str) -> String {
    let mut flat = String::with_capacity(input.len().min(MAX_BODY_CHARS));
    let mut esc: Option<Escape> = None;
    let mut pending_space = false;

    for c in input.chars() {
        if let Some(state) = esc {
            esc = match (state, c) {
                (Escape::Start, '[') => Some(Escape::Csi),
                (Escape::Start, ']') => Some(Escape::Osc),
                (Escape::Start, _) => None,
                (Escape::Csi, '@'..='~') => None,
                (Escape::Csi, _) => Some(Escape::Csi),
                (Escape::Osc, '\x07') => None,
                (Escape::Osc, '\x1b') => Some(Escape::OscEsc),
                (Escape::Osc, _) => Some(Escape::Osc),
                (Escape::OscEsc, '\\') => None,
                (Escape::OscEsc, _) => Some(Escape::Osc),
            };
            continue;
        }
        if c == '\x1b' {
            esc = Some(Escape::Start);
        } else if c.is_whitespace() {
            pending_space = !flat.is_empty();
        } else if !(c.is_control() || is_bidi_control(c)) {
            if pending_space {
                flat.push(' ');
                pending_space = false;
            }
            flat.push(c);
        }
    }

    let redacted = redact_secrets(&flat);
    match redacted.char_indices().nth(MAX_BODY_CHARS) {
        Some((cut, _)) => format!("{} ...[truncated]", &redacted[..cut]),
        None => redacted,
    }
}

fn redact_secrets(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some((prefix, value_len)) = next_secret(rest) {
        out.push_str(&rest[..prefix]);
        out.push_str(REDACTED);
        rest = &rest[prefix + value_len..];
    }
    out.push_str(rest);
    out
}

// Finds the next credential value: returns (offset of the value, its length).
fn next_secret(input: &str) -> Option<(usize, usize)> {
    let lower = input.to_ascii_lowercase();
    let mut best: Option<(usize, usize)> = None;
    let mut consider = |start: usize| {
        let len = input[start..]
            .find(|c: char| c.is_whitespace() || matches!(c, '&' | '"' | '\'' | ',' | '}'))
            .unwrap_or(input.len() - start);
        if len > 0 && best.is_none_or(|(b, _)| start < b) {
            best = Some((start, len));
        }
    };

    if let Some(pos) = lower.find("bearer ") {
        consider(pos + "bearer ".len());
    }
    for key in SECRET_KEYS {
        let mut from = 0;
        while let Some(found) = lower[from..].find(key) {
            let at = from + found;
            from = at + key.len();
            let boundary = at == 0 || !lower.as_bytes()[at - 1].is_ascii_alphanumeric();
            if !boundary {
                continue;
            }
            let after = &input[from..];
            let skip = after
                .find(|c: char| !matches!(c, '"' | '\'' | ':' | '=' | ' '))
                .unwrap_or(after.len());
            if skip > 0 && after[..skip].contains(['=', ':']) {
                consider(from + skip);
                break;
            }
        }
    }
    best
}

fn is_bidi_control(c: char) -> bool {
    c == '\u{061C}'
        || c == '\u{200E}'
        || c == '\u{200F}'
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
