//! Canonical JSON, fingerprints, ID/domain/anchor parsing, the `x-extra`
//! value tree and the shared settings/error types used by every BatVault
//! service (spec §4.1, §3, §9, §6, §7).

pub mod canonical;
pub mod config;
pub mod error;
pub mod ids;
pub mod value;

pub use canonical::{canonical_bytes, canonical_json, ensure_prefix, fingerprint, sha256_hex};
pub use config::Settings;
pub use error::BvError;
pub use value::Value;
