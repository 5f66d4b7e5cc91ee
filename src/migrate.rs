//! One-way upgrades of legacy store files to the current format.
//!
//! Each step is triggered by the presence of its legacy file and deletes that
//! file once the next format is safely written, so the chain is idempotent.
//! Failures are contained per step: they are logged and the legacy file is
//! left in place for the next run.

use crate::crypto::Transcoder;
use crate::entry::{Entry, Store};
use crate::error::{Error, Result};
use crate::store::{self, Layout, atomic_write, version_marker_path, write_version_marker};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// How a step treats a destination file that already has content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationPolicy {
    /// Replace the destination's entries wholesale with the legacy entries
    /// (legacy behavior; entries added at the destination by a newer build
    /// are lost). When false, legacy entries are appended to the existing
    /// ones, skipping keys already present.
    pub replace_existing_destination: bool,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        MigrationPolicy {
            replace_existing_destination: true,
        }
    }
}

/// V0 entry: `{ "Name", "Key" }` with a plaintext key.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct V0Entry {
    name: String,
    key: String,
}

/// V1 and V2 shape: `{ "Version", "Entries": [...] }`.
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct EntriesList {
    version: i32,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    V0ToV1,
    V1ToV2,
    V2ToV3,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::V0ToV1 => "v0->v1",
            Step::V1ToV2 => "v1->v2",
            Step::V2ToV3 => "v2->v3",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Migrated { entries: usize },
    /// Trigger file absent or at another version; nothing written.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
#[error("{step} migration failed: {source}")]
pub struct MigrationError {
    pub step: Step,
    #[source]
    pub source: Error,
}

#[derive(Debug, Default)]
pub struct MigrationReport {
    pub steps: Vec<(Step, std::result::Result<StepOutcome, MigrationError>)>,
}

impl MigrationReport {
    pub fn outcome(&self, step: Step) -> Option<&std::result::Result<StepOutcome, MigrationError>> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, r)| r)
    }

    pub fn migrated(&self) -> usize {
        self.steps
            .iter()
            .filter(|(_, r)| matches!(r, Ok(StepOutcome::Migrated { .. })))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.steps.iter().filter(|(_, r)| r.is_err()).count()
    }
}

/// Run V0->V1->V2->V3 in order. Never fails; see the report for details.
pub fn run_migrations(
    layout: &Layout,
    transcoder: &Transcoder,
    policy: MigrationPolicy,
) -> MigrationReport {
    let mut report = MigrationReport::default();
    for step in [Step::V0ToV1, Step::V1ToV2, Step::V2ToV3] {
        let result = match step {
            Step::V0ToV1 => migrate_v0_to_v1(layout, transcoder),
            Step::V1ToV2 => migrate_v1_to_v2(layout, policy),
            Step::V2ToV3 => migrate_v2_to_v3(layout, policy),
        }
        .map_err(|source| MigrationError { step, source });

        match &result {
            Ok(StepOutcome::Migrated { entries }) => {
                tracing::info!(%step, entries, "store migrated")
            }
            Ok(StepOutcome::Skipped) => tracing::debug!(%step, "migration skipped"),
            Err(e) => tracing::warn!(%step, error = %e.source, "migration failed, legacy data kept"),
        }
        report.steps.push((step, result));
    }
    report
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    atomic_write(path, s.as_bytes())
}

fn remove_legacy_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "legacy directory not removed");
    }
}

/// Existing entries followed by incoming ones whose key is not present yet.
fn merge_entries(mut existing: Vec<Entry>, incoming: Vec<Entry>) -> Vec<Entry> {
    for entry in incoming {
        if !existing.iter().any(|e| e.key == entry.key) {
            existing.push(entry);
        }
    }
    existing
}

/// Flat plaintext list -> `{Version: 1, Entries}` with every key encrypted.
pub fn migrate_v0_to_v1(layout: &Layout, transcoder: &Transcoder) -> Result<StepOutcome> {
    let src = layout.v0_file();
    if !src.exists() {
        return Ok(StepOutcome::Skipped);
    }

    let legacy: Vec<V0Entry> = read_json(&src)?;
    let entries = legacy
        .into_iter()
        .map(|e| {
            Ok(Entry {
                name: e.name,
                key: transcoder.encrypt(&e.key)?,
                is_encrypted: true,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let count = entries.len();

    write_json(
        &layout.v1_file(),
        &EntriesList {
            version: 1,
            entries,
        },
    )?;

    std::fs::remove_file(&src)?;
    remove_legacy_dir(&layout.v0_dir());
    Ok(StepOutcome::Migrated { entries: count })
}

/// V1 file -> host-managed V2 file, entries copied verbatim.
pub fn migrate_v1_to_v2(layout: &Layout, policy: MigrationPolicy) -> Result<StepOutcome> {
    let src = layout.v1_file();
    if !src.exists() {
        return Ok(StepOutcome::Skipped);
    }

    let v1: EntriesList = read_json(&src)?;
    if v1.version != 1 {
        tracing::debug!(version = v1.version, "v1 file has unexpected version");
        return Ok(StepOutcome::Skipped);
    }
    let count = v1.entries.len();

    let dest = layout.v2_file();
    let entries = if policy.replace_existing_destination || !dest.exists() {
        v1.entries
    } else {
        let existing: EntriesList = read_json(&dest)?;
        merge_entries(existing.entries, v1.entries)
    };

    write_json(
        &dest,
        &EntriesList {
            version: 2,
            entries,
        },
    )?;
    write_version_marker(&dest)?;

    std::fs::remove_file(&src)?;
    remove_legacy_dir(&layout.v1_dir());
    Ok(StepOutcome::Migrated { entries: count })
}

/// V2 file -> current store, `Entries` renamed to `Authenticators`.
pub fn migrate_v2_to_v3(layout: &Layout, policy: MigrationPolicy) -> Result<StepOutcome> {
    let src = layout.v2_file();
    if !src.exists() {
        return Ok(StepOutcome::Skipped);
    }

    let v2: EntriesList = read_json(&src)?;
    if v2.version != 2 {
        tracing::debug!(version = v2.version, "v2 file has unexpected version");
        return Ok(StepOutcome::Skipped);
    }
    let count = v2.entries.len();

    let dest = layout.store_file();
    let entries = if policy.replace_existing_destination || !dest.exists() {
        v2.entries
    } else {
        let existing: Store = read_json(&dest)?;
        merge_entries(existing.entries, v2.entries)
    };

    store::save(
        &dest,
        &Store {
            version: 3,
            entries,
        },
    )?;

    std::fs::remove_file(&src)?;
    let marker = version_marker_path(&src);
    if marker.exists() {
        std::fs::remove_file(&marker)?;
    }
    Ok(StepOutcome::Migrated { entries: count })
}
