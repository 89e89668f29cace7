use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single entry of a space tree, either a file or a directory.
///
/// A node holding a blob reference is a file, a node without one is a
/// directory. Directories carry the aggregated size of their live
/// descendants, maintained incrementally by
/// [crate::inodes::Inodes::register_write].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Node {
    pub id: Uuid,
    /// None only for the root of a space.
    pub parent: Option<Uuid>,
    pub name: String,
    pub size: u64,
    /// base64url encoded sha256 of the content, files only.
    pub checksum: Option<String>,
    pub blob: Option<Uuid>,
    pub mime: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new_root(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent: None,
            name: String::new(),
            size: 0,
            checksum: None,
            blob: None,
            mime: None,
            created_at: now,
            last_modified_at: now,
            deleted_at: None,
        }
    }

    pub fn new_directory(parent: Uuid, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            parent: Some(parent),
            name: name.into(),
            ..Self::new_root(now)
        }
    }

    pub fn new_file(parent: Uuid, name: impl Into<String>, file: NewFile) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent: Some(parent),
            name: name.into(),
            size: file.size,
            checksum: Some(file.checksum),
            blob: Some(file.blob),
            mime: file.mime,
            created_at: file.uploaded_at,
            last_modified_at: file.uploaded_at,
            deleted_at: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.blob.is_none()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Adds `size_delta` to the size, saturating at zero, and moves the
    /// last-modified timestamp to `mod_time`. Does nothing and returns false
    /// when the timestamp already equals `mod_time`.
    pub fn apply_delta(&mut self, size_delta: i64, mod_time: DateTime<Utc>) -> bool {
        if self.last_modified_at == mod_time {
            return false;
        }

        self.last_modified_at = mod_time;
        self.size = if size_delta >= 0 {
            self.size.saturating_add(size_delta as u64)
        } else {
            self.size.saturating_sub(size_delta.unsigned_abs())
        };
        true
    }
}

/// Content metadata of a file about to be materialized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewFile {
    pub size: u64,
    pub checksum: String,
    pub blob: Uuid,
    pub mime: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_blob_reference() {
        let now = Utc::now();
        let root = Node::new_root(now);
        assert!(root.is_dir());
        assert!(root.is_root());

        let file = Node::new_file(
            root.id,
            "a.txt",
            NewFile {
                size: 3,
                checksum: "abc".into(),
                blob: Uuid::new_v4(),
                mime: None,
                uploaded_at: now,
            },
        );
        assert!(!file.is_dir());
        assert!(!file.is_root());
        assert_eq!(Some(root.id), file.parent);
    }

    #[test]
    fn serde_uses_hyphenated_keys() {
        let node = Node::new_root(Utc::now());
        let v = serde_json::to_value(&node).unwrap();
        assert!(v.get("last-modified-at").is_some());
        assert_eq!(node, serde_json::from_value(v).unwrap());
    }

    #[test]
    fn delta_is_guarded_by_mod_time() {
        let now = Utc::now();
        let mut dir = Node::new_root(now);

        // same timestamp, already applied.
        assert!(!dir.apply_delta(10, now));
        assert_eq!(0, dir.size);

        let later = now + chrono::Duration::seconds(1);
        assert!(dir.apply_delta(10, later));
        assert_eq!(10, dir.size);
        assert_eq!(later, dir.last_modified_at);

        // negative deltas saturate at zero.
        assert!(dir.apply_delta(-25, later + chrono::Duration::seconds(1)));
        assert_eq!(0, dir.size);
    }
}
