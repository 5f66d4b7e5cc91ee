//! Versioned, encrypted-at-rest store of TOTP secrets.
//!
//! Startup order for a host:
//!
//! 1. [`migrate::run_migrations`] upgrades any legacy files (never fails),
//! 2. [`store::Repository::open`] loads the current store and keeps it resident,
//! 3. queries go through [`store::Repository::project`], imports through the
//!    decoders in [`import`] and an explicit [`store::Repository::commit`].

pub mod config;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod export;
pub mod import;
pub mod migrate;
pub mod payload;
pub mod query;
pub mod store;

pub use crypto::Transcoder;
pub use entry::{Entry, EntryId, ImportCandidate, Store};
pub use error::{Error, Result};
pub use import::{ImportBatch, decode_batch_uri, decode_export_file, decode_query, decode_single_uri};
pub use migrate::{MigrationPolicy, MigrationReport, run_migrations};
pub use query::{NameMatcher, Projection, SubsequenceMatcher, project};
pub use store::{DedupePolicy, Layout, Repository};
