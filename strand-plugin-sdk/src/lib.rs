//! strand-plugin-sdk: SDK for writing plugin artifacts
//!
//! An artifact is a `cdylib` compiled to `wasm32-unknown-unknown` that may
//! declare several plugins. This SDK generates the manifest, the allocator
//! and one `process` export per plugin.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strand_plugin_sdk::prelude::*;
//!
//! struct Upper;
//!
//! impl Plugin for Upper {
//!     const NAME: &'static str = "upper";
//!     const DESCRIPTION: &'static str = "Convert input to uppercase";
//!     const TYPE_NAME: Option<&'static str> = Some("org.ivdnt.test.Upper");
//!
//!     fn process(input: &str) -> Result<String, String> {
//!         Ok(input.to_uppercase())
//!     }
//! }
//!
//! // Generate all required exports
//! export_plugins!(Upper => upper_process);
//! ```

use std::alloc::{alloc, dealloc, Layout};

// Re-export everything from strand-plugin-api
pub use strand_plugin_api::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{export_plugins, memory, Plugin};
    pub use strand_plugin_api::{ArtifactManifest, PluginSpec, API_VERSION};
}

/// Trait that plugins must implement
pub trait Plugin {
    /// Registry key
    const NAME: &'static str;

    /// Human-readable description
    const DESCRIPTION: &'static str;

    /// Fully-qualified type identifier, used for lookup by type
    const TYPE_NAME: Option<&'static str> = None;

    /// Transforms the input; `Err` is reported to the host as a processing failure
    fn process(input: &str) -> Result<String, String>;
}

/// Builds the manifest entry for a plugin exported under `export`
pub fn describe<P: Plugin>(export: &str) -> PluginSpec {
    let spec = PluginSpec::new(P::NAME, P::DESCRIPTION, export);
    match P::TYPE_NAME {
        Some(type_name) => spec.type_name(type_name),
        None => spec,
    }
}

/// Memory utilities for Wasm plugin development
pub mod memory {
    use super::*;

    /// Allocate memory in the Wasm linear memory
    ///
    /// Returns 0 for non-positive sizes.
    #[inline]
    pub fn plugin_alloc(size: i32) -> i32 {
        if size <= 0 {
            return 0;
        }
        match Layout::from_size_align(size as usize, 1) {
            Ok(layout) => unsafe { alloc(layout) as i32 },
            Err(_) => 0,
        }
    }

    /// Deallocate memory in the Wasm linear memory
    ///
    /// # Safety
    /// The ptr must have been allocated by `plugin_alloc` with the same size.
    #[inline]
    pub fn plugin_dealloc(ptr: i32, size: i32) {
        if ptr == 0 || size <= 0 {
            return;
        }
        if let Ok(layout) = Layout::from_size_align(size as usize, 1) {
            unsafe { dealloc(ptr as *mut u8, layout) }
        }
    }

    /// Copy bytes into a fresh allocation and return the packed (ptr, len)
    ///
    /// With `failed` set the buffer is packed with `pack_failure` so the
    /// host reads the bytes as an error message.
    pub fn return_bytes(bytes: &[u8], failed: bool) -> i64 {
        let len = bytes.len() as i32;
        let ptr = plugin_alloc(len);

        if ptr != 0 && len > 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, len as usize);
            }
        }

        if failed {
            pack_failure(ptr, len)
        } else {
            pack_ptr_len(ptr, len)
        }
    }

    /// Serialize data as MessagePack and return it as an allocated buffer
    pub fn serialize_and_return<T: serde::Serialize>(data: &T) -> i64 {
        let bytes = rmp_serde::to_vec(data).unwrap_or_default();
        return_bytes(&bytes, false)
    }

    /// Return the outcome of `Plugin::process`
    pub fn return_outcome(outcome: Result<String, String>) -> i64 {
        match outcome {
            Ok(output) => return_bytes(output.as_bytes(), false),
            Err(message) => return_bytes(message.as_bytes(), true),
        }
    }

    /// Read a UTF-8 string the host wrote at `ptr`
    ///
    /// Invalid UTF-8 is replaced lossily.
    ///
    /// # Safety
    /// The pointer must be valid for `len` bytes.
    pub unsafe fn read_str(ptr: i32, len: i32) -> String {
        if ptr == 0 || len <= 0 {
            return String::new();
        }
        let slice = std::slice::from_raw_parts(ptr as *const u8, len as usize);
        String::from_utf8_lossy(slice).into_owned()
    }
}

/// Macro to export all required artifact functions
///
/// This macro generates `plugin_manifest`, `plugin_alloc`, `plugin_dealloc`
/// and one `process` export per listed plugin.
///
/// # Example
///
/// ```rust,ignore
/// export_plugins!(Leetify => leet_process, DuplicateVowels => dupe_process);
/// ```
#[macro_export]
macro_rules! export_plugins {
    ($($plugin:ty => $export:ident),+ $(,)?) => {
        #[no_mangle]
        pub extern "C" fn plugin_manifest() -> i64 {
            let manifest = $crate::ArtifactManifest::new(vec![
                $( $crate::describe::<$plugin>(stringify!($export)) ),+
            ]);
            $crate::memory::serialize_and_return(&manifest)
        }

        $(
            #[no_mangle]
            pub extern "C" fn $export(input_ptr: i32, input_len: i32) -> i64 {
                let input = unsafe { $crate::memory::read_str(input_ptr, input_len) };
                let outcome = <$plugin as $crate::Plugin>::process(&input);
                $crate::memory::return_outcome(outcome)
            }
        )+

        #[no_mangle]
        pub extern "C" fn plugin_alloc(size: i32) -> i32 {
            $crate::memory::plugin_alloc(size)
        }

        #[no_mangle]
        pub extern "C" fn plugin_dealloc(ptr: i32, size: i32) {
            $crate::memory::plugin_dealloc(ptr, size)
        }
    };
}
