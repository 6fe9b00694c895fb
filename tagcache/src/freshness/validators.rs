use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Strong entity tag of `body`: a quoted hex SHA-256 digest.
pub fn etag_for(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

/// Quotes `tag` unless it already is a full (possibly weak) entity tag.
pub fn quote_etag(tag: &str) -> String {
    let tag = tag.trim();
    let opaque = tag.strip_prefix("W/").unwrap_or(tag);
    if opaque.len() >= 2 && opaque.starts_with('"') && opaque.ends_with('"') {
        tag.to_owned()
    } else {
        format!("\"{}\"", tag.trim_matches('"'))
    }
}

/// Formats `time` as an IMF-fixdate.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format(HTTP_DATE).to_string()
}

/// Parses an IMF-fixdate.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), HTTP_DATE)
        .ok()
        .map(|time| time.and_utc())
}
