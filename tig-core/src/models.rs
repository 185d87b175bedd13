use crate::diff::Hunk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Description that marks a change set as a read-only status probe.
pub const STATUS_PROBE: &str = "status";

/// Lowercase hex SHA-256 of `content`.
pub fn hash_content(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// True for exactly 64 lowercase hex characters.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
    Untracked,
    Rename,
}

impl ChangeType {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeType::Add => "add",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
            ChangeType::Untracked => "untracked",
            ChangeType::Rename => "rename",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(ChangeType::Add),
            "modify" => Some(ChangeType::Modify),
            "delete" => Some(ChangeType::Delete),
            "untracked" => Some(ChangeType::Untracked),
            "rename" => Some(ChangeType::Rename),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file-level change, either computed for status or recorded as gated.
///
/// Paths are relative to the repository root and always use `/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<String>,
    #[serde(default)]
    pub mode: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub gated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_hunks: Option<Vec<Hunk>>,
}

impl Change {
    pub fn new(change_type: ChangeType, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            change_type,
            old_path: None,
            old_hash: None,
            new_hash: None,
            mode: 0,
            size: 0,
            mod_time: None,
            gated: false,
            diff: None,
            diff_hunks: None,
        }
    }

    pub fn with_old_hash(mut self, hash: Option<String>) -> Self {
        self.old_hash = hash;
        self
    }

    pub fn with_new_hash(mut self, hash: impl Into<String>) -> Self {
        self.new_hash = Some(hash.into());
        self
    }

    pub fn with_old_path(mut self, old_path: impl Into<String>) -> Self {
        self.old_path = Some(old_path.into());
        self
    }

    pub fn with_file_info(mut self, mode: u32, size: u64, mod_time: Option<DateTime<Utc>>) -> Self {
        self.mode = mode;
        self.size = size;
        self.mod_time = mod_time;
        self
    }

    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }

    /// The hash whose blob backs this change: the new content, or for a
    /// delete the content that was removed.
    pub fn content_hash(&self) -> Option<&str> {
        self.new_hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .or_else(|| self.old_hash.as_deref().filter(|h| !h.is_empty()))
    }
}

/// Last recorded state of a tracked path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<DateTime<Utc>>,
    pub size: u64,
}

impl FileState {
    pub fn from_change(change: &Change) -> Option<Self> {
        let hash = change.new_hash.clone().filter(|h| !h.is_empty())?;
        Some(Self {
            hash,
            mod_time: change.mod_time,
            size: change.size,
        })
    }
}

/// Immutable snapshot of the gated changes at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub intent_id: Option<String>,
    pub changes: Vec<Change>,
    pub created_at: DateTime<Utc>,
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub hash: String,
}

impl ChangeSet {
    pub fn new(request: ChangeSetRequest, changes: Vec<Change>) -> Self {
        let hash = Self::compute_hash(&changes);
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            intent_id: request.intent_id,
            changes,
            created_at: Utc::now(),
            description: request.description,
            author: request.author,
            tags: request.tags,
            hash,
        }
    }

    pub fn with_parent(mut self, parent: Option<Uuid>) -> Self {
        self.parent_id = parent;
        self
    }

    /// Digest over `(path, type, new_hash, old_hash)` of every member, in order.
    pub fn compute_hash(changes: &[Change]) -> String {
        let mut hasher = Sha256::new();
        for change in changes {
            for field in [
                change.path.as_str(),
                change.change_type.as_str(),
                change.new_hash.as_deref().unwrap_or(""),
                change.old_hash.as_deref().unwrap_or(""),
            ] {
                hasher.update(field.as_bytes());
                hasher.update([0u8]);
            }
        }
        hex::encode(hasher.finalize())
    }

    pub fn verify(&self) -> bool {
        Self::compute_hash(&self.changes) == self.hash
    }

    pub fn is_probe(&self) -> bool {
        self.description == STATUS_PROBE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetRequest {
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub intent_id: Option<String>,
}

impl ChangeSetRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_intent(mut self, intent_id: impl Into<String>) -> Self {
        self.intent_id = Some(intent_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_content() {
        assert_eq!(
            hash_content(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(is_valid_hash(&hash_content(b"hello")));
    }

    #[test]
    fn test_is_valid_hash() {
        let good = "a".repeat(64);
        assert!(is_valid_hash(&good));
        assert!(!is_valid_hash(&"A".repeat(64)));
        assert!(!is_valid_hash(&"a".repeat(63)));
        assert!(!is_valid_hash(&"g".repeat(64)));
        assert!(!is_valid_hash(""));
    }

    #[test]
    fn test_change_type_strings() {
        for t in [
            ChangeType::Add,
            ChangeType::Modify,
            ChangeType::Delete,
            ChangeType::Untracked,
            ChangeType::Rename,
        ] {
            assert_eq!(ChangeType::parse(t.as_str()), Some(t));
            assert_eq!(
                serde_json::to_string(&t).unwrap(),
                format!("\"{}\"", t.as_str())
            );
        }
        assert_eq!(ChangeType::parse("create"), None);
    }

    #[test]
    fn test_change_record_roundtrip() {
        let change = Change::new(ChangeType::Modify, "src/lib.rs")
            .with_old_hash(Some(hash_content(b"old")))
            .with_new_hash(hash_content(b"new"))
            .with_file_info(0o100644, 3, Some(Utc::now()))
            .gated();

        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("\"type\":\"modify\""));
        let back: Change = serde_json::from_str(&json).unwrap();
        assert_eq!(back, change);
    }

    #[test]
    fn test_content_hash_falls_back_to_old() {
        let delete = Change::new(ChangeType::Delete, "gone.txt").with_old_hash(Some("abc".into()));
        assert_eq!(delete.content_hash(), Some("abc"));

        let add = Change::new(ChangeType::Add, "new.txt").with_new_hash("def");
        assert_eq!(add.content_hash(), Some("def"));

        assert_eq!(Change::new(ChangeType::Delete, "x").content_hash(), None);
    }

    #[test]
    fn test_changeset_hash_is_deterministic() {
        let changes = vec![
            Change::new(ChangeType::Add, "a.txt").with_new_hash("1"),
            Change::new(ChangeType::Modify, "b.txt")
                .with_new_hash("2")
                .with_old_hash(Some("0".into())),
        ];

        let first = ChangeSet::new(ChangeSetRequest::new("one"), changes.clone());
        let second = ChangeSet::new(ChangeSetRequest::new("two"), changes);
        assert_ne!(first.id, second.id);
        assert_eq!(first.hash, second.hash);
        assert!(first.verify());
    }

    #[test]
    fn test_changeset_hash_separates_fields() {
        let a = vec![Change::new(ChangeType::Add, "ab").with_new_hash("c")];
        let b = vec![Change::new(ChangeType::Add, "a").with_new_hash("bc")];
        assert_ne!(ChangeSet::compute_hash(&a), ChangeSet::compute_hash(&b));
    }

    #[test]
    fn test_changeset_request_builder() {
        let request = ChangeSetRequest::new("Add parser")
            .with_author("dev")
            .with_tag("feature")
            .with_intent("intent-7");

        let cs = ChangeSet::new(request, Vec::new());
        assert_eq!(cs.author.as_deref(), Some("dev"));
        assert_eq!(cs.tags, vec!["feature".to_string()]);
        assert_eq!(cs.intent_id.as_deref(), Some("intent-7"));
        assert!(!cs.is_probe());
    }

    #[test]
    fn test_file_state_from_change() {
        let change = Change::new(ChangeType::Add, "a.txt")
            .with_new_hash("h")
            .with_file_info(0o644, 10, None);
        let state = FileState::from_change(&change).unwrap();
        assert_eq!(state.hash, "h");
        assert_eq!(state.size, 10);

        assert!(FileState::from_change(&Change::new(ChangeType::Delete, "a.txt")).is_none());
    }
}
