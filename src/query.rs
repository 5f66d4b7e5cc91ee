use crate::crypto::{Transcoder, decode_secret};
use crate::entry::{Entry, EntryId};
use totp_rs::{Algorithm, TOTP};
use zeroize::Zeroizing;

pub const DIGITS: usize = 6;
pub const STEP_SECS: u64 = 30;

/// Scores a search query against an entry name.
pub trait NameMatcher: Send + Sync {
    fn matches(&self, query: &str, name: &str) -> bool;
}

/// Case-insensitive subsequence match: every query character appears in the
/// name in order. Whitespace in the query is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubsequenceMatcher;

impl NameMatcher for SubsequenceMatcher {
    fn matches(&self, query: &str, name: &str) -> bool {
        let mut haystack = name.chars().flat_map(char::to_lowercase);
        query
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .all(|q| haystack.any(|h| h == q))
    }
}

/// One row of a query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Live {
        name: String,
        code: String,
        remaining_secs: u64,
        id: EntryId,
    },
    /// Key cannot be decrypted or is not base32. Kept so the user can delete it.
    Invalid { name: String, id: EntryId },
}

impl Projection {
    pub fn name(&self) -> &str {
        match self {
            Projection::Live { name, .. } | Projection::Invalid { name, .. } => name,
        }
    }

    pub fn id(&self) -> &EntryId {
        match self {
            Projection::Live { id, .. } | Projection::Invalid { id, .. } => id,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Projection::Live { .. })
    }
}

/// Current code and seconds until it rotates (SHA-1, 6 digits, 30 s step).
pub fn totp_code(secret: &[u8], now: u64) -> (String, u64) {
    // unchecked: 80-bit secrets are common and must still work
    let totp = TOTP::new_unchecked(Algorithm::SHA1, DIGITS, 1, STEP_SECS, secret.to_vec());
    (totp.generate(now), STEP_SECS - now % STEP_SECS)
}

fn project_entry(entry: &Entry, transcoder: &Transcoder, now: u64) -> Projection {
    let id = EntryId::of(entry);

    let plaintext = if entry.is_encrypted {
        match transcoder.decrypt(&entry.key) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(name = %entry.name, error = %e, "entry unreadable");
                return Projection::Invalid {
                    name: entry.name.clone(),
                    id,
                };
            }
        }
    } else {
        Zeroizing::new(entry.key.clone())
    };

    match decode_secret(&plaintext).map(Zeroizing::new) {
        Some(bytes) => {
            let (code, remaining_secs) = totp_code(&bytes, now);
            Projection::Live {
                name: entry.name.clone(),
                code,
                remaining_secs,
                id,
            }
        }
        None => Projection::Invalid {
            name: entry.name.clone(),
            id,
        },
    }
}

/// Walk the entries in order and render each match as Live or Invalid.
///
/// Read-only: entries are never modified and a bad entry never stops the
/// rest from being projected.
pub fn project(
    entries: &[Entry],
    transcoder: &Transcoder,
    search: &str,
    matcher: &dyn NameMatcher,
    now: u64,
) -> Vec<Projection> {
    entries
        .iter()
        .filter(|e| search.is_empty() || matcher.matches(search, &e.name))
        .map(|e| project_entry(e, transcoder, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(t: &Transcoder, name: &str, secret: &str) -> Entry {
        Entry {
            name: name.to_string(),
            key: t.encrypt(secret).unwrap(),
            is_encrypted: true,
        }
    }

    #[test]
    fn test_rfc6238_vector() {
        // RFC 6238 SHA-1 seed, T = 59
        let (code, remaining) = totp_code(b"12345678901234567890", 59);
        assert_eq!(code, "287082");
        assert_eq!(remaining, 1);
    }

    #[test]
    fn test_matcher() {
        let m = SubsequenceMatcher;
        assert!(m.matches("gh", "GitHub: alice"));
        assert!(m.matches("git alice", "GitHub: alice"));
        assert!(!m.matches("bg", "GitHub"));
        assert!(m.matches("", "anything"));
    }

    #[test]
    fn test_corrupted_entry_is_invalid() {
        let t = Transcoder::generate();
        let mut bad = entry(&t, "Broken", "JBSWY3DPEHPK3PXP");
        bad.key.push_str("AAAA");
        let before = bad.clone();

        let out = project(std::slice::from_ref(&bad), &t, "", &SubsequenceMatcher, 0);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0],
            Projection::Invalid {
                name: "Broken".to_string(),
                id: EntryId::of(&before),
            }
        );
        assert_eq!(bad, before);
    }

    #[test]
    fn test_mixed_entries() {
        let t = Transcoder::generate();
        let entries = vec![
            entry(&t, "Work", "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ"),
            entry(&t, "Not base32", "hello world!"),
            Entry {
                name: "Plain".to_string(),
                key: "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ".to_string(),
                is_encrypted: false,
            },
            Entry {
                name: "Garbage".to_string(),
                key: "%%%".to_string(),
                is_encrypted: true,
            },
        ];

        let out = project(&entries, &t, "", &SubsequenceMatcher, 59);
        let live: Vec<bool> = out.iter().map(Projection::is_live).collect();
        assert_eq!(live, vec![true, false, true, false]);
        match &out[0] {
            Projection::Live {
                code,
                remaining_secs,
                ..
            } => {
                assert_eq!(code, "287082");
                assert_eq!(*remaining_secs, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_search_filters() {
        let t = Transcoder::generate();
        let entries = vec![
            entry(&t, "GitHub", "JBSWY3DPEHPK3PXP"),
            entry(&t, "Mail", "JBSWY3DPEHPK3PXP"),
        ];
        let out = project(&entries, &t, "git", &SubsequenceMatcher, 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name(), "GitHub");
    }
}
