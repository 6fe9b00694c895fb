use http::HeaderMap;
use http::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH};

use super::validators::parse_http_date;

/// Whether a stored representation satisfies the request's preconditions,
/// in which case `304 Not Modified` is sent instead of the body.
///
/// `If-None-Match` takes precedence: when present, `If-Modified-Since` is
/// never consulted.
pub fn is_not_modified(
    request: &HeaderMap,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> bool {
    let mut if_none_match = request
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .peekable();
    if if_none_match.peek().is_some() {
        return if_none_match.any(|value| etag_list_matches(value, etag));
    }

    let since = request
        .get(IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_http_date);
    let modified = last_modified.and_then(parse_http_date);
    match (since, modified) {
        (Some(since), Some(modified)) => modified <= since,
        _ => false,
    }
}

fn etag_list_matches(list: &str, etag: Option<&str>) -> bool {
    if list.trim() == "*" {
        return true;
    }
    let Some(etag) = etag else {
        return false;
    };
    list.split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .any(|candidate| weak_eq(candidate, etag))
}

fn weak_eq(a: &str, b: &str) -> bool {
    let strip = |tag: &str| tag.strip_prefix("W/").unwrap_or(tag).to_owned();
    strip(a) == strip(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    const STORED_DATE: &str = "Wed, 21 Oct 2015 07:28:00 GMT";
    const PAST: &str = "Tue, 20 Oct 2015 07:28:00 GMT";
    const FUTURE: &str = "Thu, 22 Oct 2015 07:28:00 GMT";

    fn headers(pairs: &[(http::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn if_none_match_variants() {
        let etag = Some("\"e1\"");
        assert!(is_not_modified(&headers(&[(IF_NONE_MATCH, "\"e1\"")]), etag, None));
        assert!(is_not_modified(&headers(&[(IF_NONE_MATCH, "*")]), etag, None));
        assert!(is_not_modified(&headers(&[(IF_NONE_MATCH, "\"x\", W/\"e1\"")]), etag, None));
        assert!(!is_not_modified(&headers(&[(IF_NONE_MATCH, "\"nope\"")]), etag, None));
        assert!(!is_not_modified(&headers(&[(IF_NONE_MATCH, "\"e1\"")]), None, None));
    }

    #[test]
    fn if_none_match_wins_over_if_modified_since() {
        let etag = Some("\"e1\"");
        let matching = headers(&[(IF_NONE_MATCH, "\"e1\""), (IF_MODIFIED_SINCE, PAST)]);
        assert!(is_not_modified(&matching, etag, Some(STORED_DATE)));

        let mismatching = headers(&[(IF_NONE_MATCH, "\"nope\""), (IF_MODIFIED_SINCE, FUTURE)]);
        assert!(!is_not_modified(&mismatching, etag, Some(STORED_DATE)));
    }

    #[test]
    fn if_modified_since_alone() {
        let stored = Some(STORED_DATE);
        assert!(is_not_modified(&headers(&[(IF_MODIFIED_SINCE, FUTURE)]), None, stored));
        assert!(is_not_modified(&headers(&[(IF_MODIFIED_SINCE, STORED_DATE)]), None, stored));
        assert!(!is_not_modified(&headers(&[(IF_MODIFIED_SINCE, PAST)]), None, stored));
        assert!(!is_not_modified(&headers(&[(IF_MODIFIED_SINCE, "garbage")]), None, stored));
        assert!(!is_not_modified(&HeaderMap::new(), Some("\"e1\""), stored));
    }
}
