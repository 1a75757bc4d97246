use percent_encoding::percent_decode_str;

use crate::error::{CdnError, Result};

/// Extracts the file name announced by a `Content-Disposition` header value.
///
/// `filename*` (RFC 5987) wins over `filename` when both are present. The
/// result is reduced to its last path component so a server cannot steer the
/// download outside the destination directory.
pub fn filename(header: &str) -> Result<String> {
    let mut plain = None;
    let mut extended = None;

    for param in split_params(header) {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "filename" => plain = Some(unquote(value)),
            "filename*" => extended = decode_extended(value),
            _ => {}
        }
    }

    let raw = extended.or(plain).ok_or_else(|| {
        CdnError::Protocol(format!("no filename in Content-Disposition `{header}`"))
    })?;
    last_component(&raw).ok_or_else(|| {
        CdnError::Protocol(format!("unusable filename `{raw}` in Content-Disposition"))
    })
}

fn split_params(header: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in header.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&header[start..]);
    params
}

fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

// charset'language'percent-encoded-value
fn decode_extended(value: &str) -> Option<String> {
    let mut parts = value.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;
    if !charset.eq_ignore_ascii_case("utf-8") {
        return None;
    }
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

fn last_component(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}
