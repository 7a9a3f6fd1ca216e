//! strand-plugin-api: Shared types for strand plugin artifacts
//!
//! This crate defines the protocol between the host and a guest artifact
//! (a WebAssembly module). The artifact manifest travels as MessagePack;
//! plugin input and output travel as raw UTF-8.

use serde::{Deserialize, Serialize};

/// API version for compatibility checking
pub const API_VERSION: u32 = 1;

/// Export names every artifact must provide
pub mod exports {
    /// Linear memory shared with the host
    pub const MEMORY: &str = "memory";
    /// `(size: i32) -> i32`
    pub const ALLOC: &str = "plugin_alloc";
    /// `(ptr: i32, size: i32)`
    pub const DEALLOC: &str = "plugin_dealloc";
    /// `() -> i64`, packed pointer to the MessagePack manifest
    pub const MANIFEST: &str = "plugin_manifest";
}

/// Manifest returned by an artifact's `plugin_manifest()` export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// API version for compatibility
    pub api_version: u32,

    /// Plugins declared by this artifact
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

/// Declaration of one plugin inside an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Registry key (e.g. "upper")
    pub name: String,

    /// Short human-readable description
    pub description: String,

    /// Fully-qualified type identifier (e.g. "org.ivdnt.test.Upper")
    #[serde(default)]
    pub type_name: Option<String>,

    /// Name of the `(ptr, len) -> i64` export implementing `process`
    pub export: String,
}

impl ArtifactManifest {
    /// Create a manifest for the current API version
    pub fn new(plugins: Vec<PluginSpec>) -> Self {
        Self {
            api_version: API_VERSION,
            plugins,
        }
    }

    /// Add a plugin declaration
    pub fn plugin(mut self, spec: PluginSpec) -> Self {
        self.plugins.push(spec);
        self
    }
}

impl PluginSpec {
    /// Create a plugin declaration
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        export: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            type_name: None,
            export: export.into(),
        }
    }

    /// Set the fully-qualified type identifier
    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

/// Pack a pointer and length into a single i64
///
/// wasm32-unknown-unknown exports cannot return two values, so every
/// buffer handed back to the host is packed as `(ptr << 32) | len`.
/// Failures are packed with [`pack_failure`] instead.
#[inline]
pub fn pack_ptr_len(ptr: i32, len: i32) -> i64 {
    ((ptr as i64) << 32) | (len as i64 & 0xFFFF_FFFF)
}

/// Unpack ptr and len from a packed i64
#[inline]
pub fn unpack_ptr_len(packed: i64) -> (i32, i32) {
    let ptr = (packed >> 32) as i32;
    let len = (packed & 0xFFFF_FFFF) as i32;
    (ptr, len)
}

/// Pack a processing failure message
///
/// The length is stored bitwise-inverted, so every failure, including one
/// with an empty message, has a negative length field.
#[inline]
pub fn pack_failure(ptr: i32, len: i32) -> i64 {
    pack_ptr_len(ptr, !len)
}

/// Unpack the result of a process export as `(ptr, len, failed)`
#[inline]
pub fn unpack_outcome(packed: i64) -> (i32, i32, bool) {
    let (ptr, len) = unpack_ptr_len(packed);
    if len < 0 {
        (ptr, !len, true)
    } else {
        (ptr, len, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_serialization() {
        let manifest = ArtifactManifest::new(vec![])
            .plugin(PluginSpec::new("leet", "l33t", "leet_process"))
            .plugin(
                PluginSpec::new("dupe", "Duplicate vowels", "dupe_process")
                    .type_name("org.ivdnt.test.DuplicateVowels"),
            );

        let bytes = rmp_serde::to_vec(&manifest).unwrap();
        let decoded: ArtifactManifest = rmp_serde::from_slice(&bytes).unwrap();

        assert_eq!(decoded.api_version, API_VERSION);
        assert_eq!(decoded.plugins.len(), 2);
        assert_eq!(decoded.plugins[0].type_name, None);
        assert_eq!(
            decoded.plugins[1].type_name.as_deref(),
            Some("org.ivdnt.test.DuplicateVowels")
        );
    }

    #[test]
    fn test_pack_unpack_negative_len() {
        let packed = pack_ptr_len(0x100, -12);
        assert_eq!(unpack_ptr_len(packed), (0x100, -12));

        let packed = pack_ptr_len(0x12345678, 0x100);
        assert_eq!(unpack_ptr_len(packed), (0x12345678, 0x100));
    }

    #[test]
    fn test_failure_outcome() {
        assert_eq!(unpack_outcome(pack_failure(0x100, 12)), (0x100, 12, true));
        assert_eq!(unpack_outcome(pack_ptr_len(0x100, 12)), (0x100, 12, false));

        // An empty failure must not look like an empty success
        assert_eq!(unpack_outcome(pack_failure(0, 0)), (0, 0, true));
        assert_eq!(unpack_outcome(pack_ptr_len(0, 0)), (0, 0, false));
    }
}
