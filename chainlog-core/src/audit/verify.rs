//! Hash chain verification
//!
//! Replays a whole log and checks every link. The same routine backs the
//! public `verify()` call and the chain-head recovery done before a write.

use serde_json::{Map, Value};
use std::time::SystemTime;
use tracing::debug;

use super::chain::{compute_hash, hashes_match, IntegrityKey};
use super::entry::{AuditEntry, HASH_FIELD, PREV_HASH_FIELD};
use super::storage::LogStore;
use super::{AuditError, Result};

/// Outcome of a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Hash of the last entry, `None` for an empty log
    pub last_hash: Option<String>,
    /// Number of (non-blank) entries
    pub lines: usize,
    /// Modification time observed before the log was read
    pub mtime: Option<SystemTime>,
}

impl VerifyReport {
    pub fn empty() -> Self {
        Self {
            last_hash: None,
            lines: 0,
            mtime: None,
        }
    }

    /// Modification time in milliseconds since the Unix epoch
    pub fn mtime_ms(&self) -> Option<i64> {
        self.mtime
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis())
    }
}

/// Iterate non-blank lines, numbered from 1
fn entry_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| (i + 1, line))
}

fn parse_line(line_no: usize, line: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AuditError::integrity(
            line_no,
            "invalid JSON: expected an object",
        )),
        Err(e) => Err(AuditError::integrity(line_no, format!("invalid JSON: {}", e))),
    }
}

/// Check every link of `content` and return the final chain head
pub fn verify_content(content: &str, key: &IntegrityKey) -> Result<(Option<String>, usize)> {
    let mut expected_prev: Option<String> = None;
    let mut lines = 0;

    for (line_no, line) in entry_lines(content) {
        let entry = parse_line(line_no, line)?;

        let prev_hash = match entry.get(PREV_HASH_FIELD) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => return Err(AuditError::integrity(line_no, "unexpected prevHash value")),
        };
        if prev_hash != expected_prev.as_deref() {
            return Err(AuditError::integrity(line_no, "unexpected prevHash value"));
        }

        let stored = match entry.get(HASH_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => return Err(AuditError::integrity(line_no, "missing hash value")),
        };

        let computed = compute_hash(&entry, key)?;
        if !hashes_match(&computed, &stored) {
            return Err(AuditError::integrity(line_no, "hash mismatch"));
        }

        expected_prev = Some(stored);
        lines = line_no;
    }

    Ok((expected_prev, lines))
}

/// Verify the log held by `store`. A missing log verifies as empty.
pub async fn verify_store(store: &dyn LogStore, key: &IntegrityKey) -> Result<VerifyReport> {
    // Stat before reading: a write racing the read shows up as a newer mtime
    let mtime = store.modified().await?;
    let Some(content) = store.read_all().await? else {
        return Ok(VerifyReport::empty());
    };

    let (last_hash, lines) = verify_content(&content, key)?;
    debug!(
        target: "audit",
        path = %store.path().display(),
        lines,
        "Verified audit chain"
    );

    Ok(VerifyReport {
        last_hash,
        lines,
        mtime,
    })
}

/// Parse every entry without checking the chain
pub fn parse_entries(content: &str) -> Result<Vec<AuditEntry>> {
    entry_lines(content)
        .map(|(line_no, line)| parse_line(line_no, line).map(AuditEntry::from_fields))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signed_line(fields: Value, prev: Option<&str>, key: &IntegrityKey) -> (String, String) {
        let mut map = fields.as_object().cloned().unwrap();
        map.insert(PREV_HASH_FIELD.into(), prev.map_or(Value::Null, |p| json!(p)));
        let hash = compute_hash(&map, key).unwrap();
        map.insert(HASH_FIELD.into(), json!(hash.clone()));
        (AuditEntry::from_fields(map).to_line(), hash)
    }

    fn chain(n: usize, key: &IntegrityKey) -> (Vec<String>, Vec<String>) {
        let mut lines = Vec::new();
        let mut hashes: Vec<String> = Vec::new();
        for i in 0..n {
            let prev = hashes.last().map(String::as_str);
            let (line, hash) = signed_line(json!({"seq": i}), prev, key);
            lines.push(line);
            hashes.push(hash);
        }
        (lines, hashes)
    }

    #[test]
    fn test_valid_chain() {
        let key = IntegrityKey::new("secret-key");
        let (lines, hashes) = chain(3, &key);

        let (last, count) = verify_content(&lines.join("\n"), &key).unwrap();
        assert_eq!(count, 3);
        assert_eq!(last.as_deref(), Some(hashes[2].as_str()));
    }

    #[test]
    fn test_blank_lines_ignored_and_not_counted() {
        let key = IntegrityKey::new("secret-key");
        let (lines, _) = chain(2, &key);
        let content = format!("\n{}\n\n   \n{}", lines[0], lines[1]);

        let (_, count) = verify_content(&content, &key).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_empty_content() {
        let key = IntegrityKey::new("k");
        assert_eq!(verify_content("", &key).unwrap(), (None, 0));
    }

    #[test]
    fn test_malformed_line() {
        let key = IntegrityKey::new("k");
        let (lines, _) = chain(1, &key);
        let content = format!("{}\n{{not json", lines[0]);

        let err = verify_content(&content, &key).unwrap_err();
        assert_eq!(err.integrity_line(), Some(2));
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn test_deleted_entry_breaks_link() {
        let key = IntegrityKey::new("k");
        let (lines, _) = chain(3, &key);
        let content = format!("{}\n{}", lines[0], lines[2]);

        let err = verify_content(&content, &key).unwrap_err();
        assert_eq!(err.integrity_line(), Some(2));
        assert!(err.to_string().contains("unexpected prevHash value"));
    }

    #[test]
    fn test_reordered_entries() {
        let key = IntegrityKey::new("k");
        let (lines, _) = chain(2, &key);
        let content = format!("{}\n{}", lines[1], lines[0]);

        let err = verify_content(&content, &key).unwrap_err();
        assert_eq!(err.integrity_line(), Some(1));
    }

    #[test]
    fn test_missing_hash() {
        let key = IntegrityKey::new("k");
        let err = verify_content(r#"{"prevHash":null,"seq":0}"#, &key).unwrap_err();
        assert_eq!(err.integrity_line(), Some(1));
        assert!(err.to_string().contains("missing hash value"));
    }

    #[test]
    fn test_edited_field_is_hash_mismatch() {
        let key = IntegrityKey::new("k");
        let (mut lines, _) = chain(2, &key);
        lines[1] = lines[1].replace(r#""seq":1"#, r#""seq":7"#);

        let err = verify_content(&lines.join("\n"), &key).unwrap_err();
        assert_eq!(err.integrity_line(), Some(2));
        assert!(err.to_string().contains("hash mismatch"));
    }

    #[test]
    fn test_wrong_key_is_hash_mismatch() {
        let (lines, _) = chain(2, &IntegrityKey::new("right"));
        let err = verify_content(&lines.join("\n"), &IntegrityKey::new("wrong")).unwrap_err();
        assert_eq!(err.integrity_line(), Some(1));
        assert!(err.to_string().contains("hash mismatch"));
    }

    #[test]
    fn test_parse_entries_without_chain_checks() {
        let entries = parse_entries("{\"a\":1}\n\n{\"b\":2}\n").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].get("b"), Some(&json!(2)));

        let err = parse_entries("{\"a\":1}\n[1]").unwrap_err();
        assert_eq!(err.integrity_line(), Some(2));
    }
}
