//! Miscellaneous helper utilities.
use std::borrow::Cow;

/// Path-style directory of `path`: drops the final segment and collapses
/// repeated separators.
///
/// Applied to a full URL this also collapses the `//` after the scheme, so
/// `https://host/a/b.mpd` becomes `https:/host/a`. Use
/// [`repair_scheme_separator`] on the result.
#[must_use]
pub fn parent_directory(path: &str) -> String {
    let parent = match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => return ".".to_string(),
    };

    let joined = parent
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    if path.starts_with('/') {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Restore the `//` after a URL scheme that was collapsed to a single `/`.
///
/// Only the separator directly following the scheme is considered, so a
/// `https:/` appearing later in the host or path is left alone. Inputs that
/// already carry `scheme://` are returned unchanged.
#[must_use]
pub fn repair_scheme_separator(url: &str) -> Cow<'_, str> {
    let Some((scheme, rest)) = url.split_once(":/") else {
        return Cow::Borrowed(url);
    };

    if rest.starts_with('/') || !is_scheme(scheme) {
        return Cow::Borrowed(url);
    }

    Cow::Owned(format!("{}://{}", scheme, rest))
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// First characters of a bearer value, safe to put in logs.
#[must_use]
pub fn token_prefix(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(token.len());
    &token[..end]
}

/// Lossy, length-capped rendering of an upstream body for error messages.
#[must_use]
pub fn body_excerpt(body: &[u8]) -> String {
    const MAX: usize = 256;
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}
