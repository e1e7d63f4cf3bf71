//! Small shared helpers used across the orchestration modules.

use fxhash::FxBuildHasher;
use std::collections::HashMap;

/// Fast hash map keyed by patch/cell indices, matching the teacher crate's
/// `fxhash`-backed map used for sparse spatial lookups.
pub type FxMap<K, V> = HashMap<K, V, FxBuildHasher>;
