//! Length-prefixed string set encoding used by the distributed tag index.
//!
//! Layout: `[count: u32 LE]` followed by `count` times `[len: u32 LE][utf-8]`.

const WORD: usize = 4;

/// Encodes `set` as `[count][len][bytes]...`.
pub fn encode_string_set<S: AsRef<str>>(set: &[S]) -> Vec<u8> {
    let payload: usize = set.iter().map(|s| WORD + s.as_ref().len()).sum();
    let mut out = Vec::with_capacity(WORD + payload);
    out.extend_from_slice(&(set.len() as u32).to_le_bytes());
    for item in set {
        let item = item.as_ref().as_bytes();
        out.extend_from_slice(&(item.len() as u32).to_le_bytes());
        out.extend_from_slice(item);
    }
    out
}

/// Decodes a buffer produced by [`encode_string_set`].
///
/// Never fails: decoding stops at the first truncated or invalid item and
/// returns what was read so far. Buffers shorter than the header yield an
/// empty set.
pub fn decode_string_set(data: &[u8]) -> Vec<String> {
    let Some((count, mut rest)) = read_word(data) else {
        return Vec::new();
    };
    // Every item needs at least its length prefix.
    let mut out = Vec::with_capacity((count as usize).min(rest.len() / WORD));
    for _ in 0..count {
        let Some((len, tail)) = read_word(rest) else {
            break;
        };
        let len = len as usize;
        if tail.len() < len {
            break;
        }
        let (item, tail) = tail.split_at(len);
        match std::str::from_utf8(item) {
            Ok(item) => out.push(item.to_owned()),
            Err(_) => break,
        }
        rest = tail;
    }
    out
}

fn read_word(data: &[u8]) -> Option<(u32, &[u8])> {
    let (head, rest) = data.split_first_chunk::<WORD>()?;
    Some((u32::from_le_bytes(*head), rest))
}
