//! Locating and rewriting `sourceMappingURL` comments in downloaded bundles.

use reqwest::Url;

const SOURCE_MAPPING_PREFIXES: [&str; 2] = ["//# sourceMappingURL=", "//@ sourceMappingURL="];

/// Byte range of the last source-map target in `body`, if any.
fn locate_target(body: &str) -> Option<(usize, usize)> {
    let (prefix_start, prefix) = SOURCE_MAPPING_PREFIXES
        .iter()
        .filter_map(|prefix| body.rfind(prefix).map(|pos| (pos, *prefix)))
        .max_by_key(|(pos, _)| *pos)?;

    let start = prefix_start + prefix.len();
    let rest = &body[start..];
    let len = rest.find(char::is_whitespace).unwrap_or(rest.len());
    if len == 0 {
        return None;
    }
    Some((start, start + len))
}

/// Resolve the bundle's source map URL against the URL the bundle came from.
///
/// Inline `data:` maps are ignored since there is nothing to download.
pub fn source_map_url(script_url: &Url, body: &str) -> Option<Url> {
    let (start, end) = locate_target(body)?;
    let target = &body[start..end];
    if target.starts_with("data:") {
        return None;
    }
    script_url.join(target).ok()
}

/// Point the bundle's last `sourceMappingURL` comment at `new_target`.
pub fn rewrite_source_map_url(body: &str, new_target: &str) -> String {
    match locate_target(body) {
        Some((start, end)) => {
            let mut rewritten = String::with_capacity(body.len() + new_target.len());
            rewritten.push_str(&body[..start]);
            rewritten.push_str(new_target);
            rewritten.push_str(&body[end..]);
            rewritten
        }
        None => body.to_string(),
    }
}

/// Last path segment of a URL, without the query string.
pub fn url_basename(url: &Url) -> Option<&str> {
    url.path_segments()?.next_back().filter(|s| !s.is_empty())
}
