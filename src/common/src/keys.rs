//! Key encoding for the table and document stores.
//!
//! Partition keys, row keys and document ids are hex-encoded before they become
//! object path segments. Hex encoding is order preserving, so lexical order of
//! the encoded segment matches byte order of the original key.

use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};

/// Width of a reverse-chronological row key.
const REVERSE_KEY_WIDTH: usize = 19;

/// Maximum key length accepted by the stores, in bytes.
pub const MAX_KEY_BYTES: usize = 1024;

/// Encode a partition key, row key or document id as a path segment.
pub fn encode_key(key: &str) -> StoreResult<String> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(StoreError::InvalidKey(format!(
            "key exceeds {MAX_KEY_BYTES} bytes: {} bytes",
            key.len()
        )));
    }
    Ok(hex::encode(key.as_bytes()))
}

/// Decode a path segment produced by [`encode_key`].
pub fn decode_key(segment: &str) -> StoreResult<String> {
    let bytes = hex::decode(segment)
        .map_err(|e| StoreError::InvalidKey(format!("segment '{segment}' is not hex: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| StoreError::InvalidKey(format!("segment '{segment}' is not utf-8: {e}")))
}

/// Validate a table name.
///
/// Table names are alphanumeric, start with a letter and are 3 to 63
/// characters long.
pub fn validate_table_name(name: &str) -> StoreResult<()> {
    let len_ok = (3..=63).contains(&name.len());
    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    let alphanumeric = name.chars().all(|c| c.is_ascii_alphanumeric());

    if len_ok && starts_with_letter && alphanumeric {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(format!(
            "invalid table name '{name}': expected 3-63 alphanumeric characters starting with a letter"
        )))
    }
}

/// Row key that sorts newer timestamps first.
///
/// Keys are fixed-width decimal renderings of `i64::MAX - millis`, so the
/// lexical order of row keys is reverse chronological order.
pub fn reverse_chronological_row_key(timestamp: DateTime<Utc>) -> String {
    let inverted = i64::MAX.saturating_sub(timestamp.timestamp_millis().max(0));
    format!("{inverted:0width$}", width = REVERSE_KEY_WIDTH)
}

/// Recover the timestamp from a key produced by [`reverse_chronological_row_key`].
pub fn timestamp_from_reverse_key(row_key: &str) -> Option<DateTime<Utc>> {
    let prefix = row_key.get(..REVERSE_KEY_WIDTH)?;
    let inverted: i64 = prefix.parse().ok()?;
    DateTime::from_timestamp_millis(i64::MAX - inverted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_encode_key_preserves_order() {
        let mut keys = vec!["device-10", "Device-2", "alpha", "alpha/beta", "zeta", "Ω-unit"];
        let mut encoded: Vec<String> = keys.iter().map(|k| encode_key(k).unwrap()).collect();

        keys.sort();
        encoded.sort();

        let decoded: Vec<String> = encoded.iter().map(|e| decode_key(e).unwrap()).collect();
        assert_eq!(decoded, keys);
    }

    #[test]
    fn test_encode_key_rejects_empty_and_oversized() {
        assert!(encode_key("").is_err());
        assert!(encode_key(&"x".repeat(MAX_KEY_BYTES + 1)).is_err());
        assert!(encode_key(&"x".repeat(MAX_KEY_BYTES)).is_ok());
    }

    #[test]
    fn test_decode_key_rejects_garbage() {
        assert!(decode_key("not-hex").is_err());
        assert!(decode_key("ff").is_err(), "invalid utf-8 must be rejected");
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("ForeignKeyEdges").is_ok());
        assert!(validate_table_name("t01").is_ok());
        assert!(validate_table_name("ab").is_err());
        assert!(validate_table_name("1table").is_err());
        assert!(validate_table_name("has-dash").is_err());
        assert!(validate_table_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_reverse_keys_sort_newest_first() {
        let now = Utc::now();
        let older = now - Duration::days(90);
        let newer = now - Duration::minutes(5);

        let older_key = reverse_chronological_row_key(older);
        let newer_key = reverse_chronological_row_key(newer);

        assert_eq!(older_key.len(), REVERSE_KEY_WIDTH);
        assert!(newer_key < older_key, "newer rows must sort first");
    }

    #[test]
    fn test_reverse_key_round_trip() {
        let ts = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let key = reverse_chronological_row_key(ts);
        assert_eq!(timestamp_from_reverse_key(&key), Some(ts));
        assert_eq!(timestamp_from_reverse_key("short"), None);
    }
}
