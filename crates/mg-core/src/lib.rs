//! mg-core - Core library for Migrid
//!
//! This crate provides the migration registry (file discovery, pairing and
//! prefix resolution), chain planning with timeline validation, digest and
//! rerun-fingerprint policies, and the non-transactional index validator
//! shared by all Migrid components. It performs no database or process I/O.

pub mod checksum;
pub mod digest;
pub mod error;
pub mod fingerprint;
pub mod patch;
pub mod ranges;
pub mod registry;
pub mod vars;
pub mod wrap;

pub use error::{CoreError, CoreResult};
pub use registry::{MigrationEntry, MigrationFile, Registry};
pub use vars::MigrationVars;
