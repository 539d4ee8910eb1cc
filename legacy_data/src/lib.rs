//! Shared data model for Our Legacy content packages and hook manifests.

pub mod defs;
pub mod validate;

pub use defs::*;
pub use validate::{ValidationError, is_valid_id, is_valid_version, validate_hook_manifest, validate_package_manifest};
