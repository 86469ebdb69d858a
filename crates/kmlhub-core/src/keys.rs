//! Storage key helpers shared by the client pipeline and the proxy service.
//!
//! Every uploaded file lives under [`KEY_PREFIX`]: `input_kml_files/{filename}`.

use percent_encoding::percent_decode_str;

/// Namespace all uploads are written under.
pub const KEY_PREFIX: &str = "input_kml_files";

/// Strip any directory components a caller may have put in a filename.
pub fn base_file_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(file_name)
}

/// Namespace a filename under [`KEY_PREFIX`]. Already-namespaced names are kept.
pub fn namespaced_file_name(file_name: &str) -> String {
    let prefix = format!("{}/", KEY_PREFIX);
    if let Some(rest) = file_name.strip_prefix(&prefix) {
        if !rest.is_empty() && !rest.contains('/') {
            return file_name.to_string();
        }
    }
    format!("{}{}", prefix, base_file_name(file_name))
}

/// Derive a storage key from a presigned URL.
///
/// Takes the URL path before any query string or fragment. When the path
/// contains [`KEY_PREFIX`] the key starts there (path-style URLs carry the
/// bucket name first); otherwise the whole path is the key.
pub fn file_key_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or("");
    let path = match without_query.find("://") {
        Some(idx) => {
            let after_scheme = &without_query[idx + 3..];
            after_scheme.find('/').map(|p| &after_scheme[p..])?
        }
        None => without_query,
    };

    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let trimmed = decoded.trim_matches('/');
    if trimmed.is_empty() || trimmed == KEY_PREFIX {
        return None;
    }

    let anchor = format!("{}/", KEY_PREFIX);
    let key = match trimmed.find(&anchor) {
        Some(idx) if idx == 0 || trimmed.as_bytes()[idx - 1] == b'/' => &trimmed[idx..],
        _ => trimmed,
    };
    Some(key.to_string())
}

/// Key used when no key can be read back from the transfer URL.
pub fn synthesized_file_key(file_name: &str, timestamp_millis: i64) -> String {
    format!(
        "{}/{}-{}",
        KEY_PREFIX,
        timestamp_millis,
        base_file_name(file_name)
    )
}
