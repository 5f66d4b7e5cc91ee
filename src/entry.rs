use serde::{Deserialize, Serialize};

/// Schema version written by this build.
pub const CURRENT_VERSION: i32 = 3;

/// One named secret. `key` is base32 text when `is_encrypted` is false,
/// otherwise an opaque ciphertext blob from the transcoder.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct Entry {
    pub name: String,
    pub key: String,
    pub is_encrypted: bool,
}

/// Current on-disk store: `{ "Version": 3, "Authenticators": [...] }`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Store {
    pub version: i32,
    #[serde(rename = "Authenticators")]
    pub entries: Vec<Entry>,
}

impl Default for Store {
    fn default() -> Self {
        Store {
            version: CURRENT_VERSION,
            entries: Vec::new(),
        }
    }
}

impl Store {
    /// Entries still holding a plaintext key.
    pub fn unencrypted_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_encrypted).count()
    }
}

/// A decoded secret waiting for the user to commit it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImportCandidate {
    pub name: String,
    pub secret: String, // base32, plaintext
}

/// Identity of a resident entry: its stored `Key` text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn of(entry: &Entry) -> Self {
        EntryId(entry.key.clone())
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        self.0 == entry.key
    }
}
