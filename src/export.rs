use crate::entry::{CURRENT_VERSION, Entry, ImportCandidate};
use crate::error::Result;
use crate::store::{Repository, atomic_write};
use serde::{Deserialize, Serialize};
use std::path::Path;
use time::OffsetDateTime;
use time::macros::format_description;

/// Portable export file. Same shape as the store but secrets are in the
/// clear and `Version` is mandatory.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PortableFile {
    pub version: i32,
    pub authenticators: Vec<Entry>,
}

impl PortableFile {
    pub fn from_candidates(candidates: Vec<ImportCandidate>) -> Self {
        PortableFile {
            version: CURRENT_VERSION,
            authenticators: candidates
                .into_iter()
                .map(|c| Entry {
                    name: c.name,
                    key: c.secret,
                    is_encrypted: false,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub written: usize,
    pub unreadable: usize,
}

/// `totp_export_2024-05-01_12-00-00.json`
pub fn default_export_name() -> Result<String> {
    let timestamp = OffsetDateTime::now_utc()
        .format(format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]"))?;
    Ok(format!("totp_export_{timestamp}.json"))
}

/// Write every readable entry, decrypted, to `path`.
///
/// Entries that cannot be decrypted are left out and counted.
pub fn export_to(repo: &Repository, path: &Path) -> Result<ExportSummary> {
    let (candidates, unreadable) = repo.export_candidates();
    let written = candidates.len();

    let file = PortableFile::from_candidates(candidates);
    let s = serde_json::to_string_pretty(&file)?;
    atomic_write(path, s.as_bytes())?;

    tracing::info!(written, unreadable, path = %path.display(), "export written");
    Ok(ExportSummary {
        written,
        unreadable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Transcoder;
    use crate::import::decode_export_file;
    use crate::store::{DedupePolicy, Layout};

    #[test]
    fn test_default_export_name() {
        let name = default_export_name().unwrap();
        assert!(name.starts_with("totp_export_"));
        assert!(name.ends_with(".json"));
        assert!(!name.contains(':'));
    }

    #[test]
    fn test_export_is_plaintext_and_reimportable() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Repository::open(
            Layout::new(dir.path()).store_file(),
            Transcoder::generate(),
        )
        .unwrap();
        let candidates = vec![
            ImportCandidate {
                name: "GitHub: alice".to_string(),
                secret: "JBSWY3DPEHPK3PXP".to_string(),
            },
            ImportCandidate {
                name: "Mail".to_string(),
                secret: "GEZDGNBVGY3TQOJQ".to_string(),
            },
        ];
        repo.commit(candidates.clone(), DedupePolicy::Off).unwrap();

        let path = dir.path().join("export.json");
        let summary = export_to(&repo, &path).unwrap();
        assert_eq!(
            summary,
            ExportSummary {
                written: 2,
                unreadable: 0
            }
        );

        let text = std::fs::read_to_string(&path).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(raw["Version"], 3);
        assert_eq!(raw["Authenticators"][0]["IsEncrypted"], false);
        assert_eq!(raw["Authenticators"][0]["Key"], "JBSWY3DPEHPK3PXP");

        assert_eq!(decode_export_file(&text).unwrap(), candidates);
    }
}
