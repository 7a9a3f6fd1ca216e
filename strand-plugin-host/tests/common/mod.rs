//! WebAssembly text fixtures for host tests
//!
//! wasmtime compiles the text format directly, so artifacts are generated
//! here instead of being checked in as binaries.

#![allow(dead_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use strand_plugin_api::{pack_failure, pack_ptr_len, ArtifactManifest, PluginSpec, API_VERSION};

const SCRATCH: i32 = 8;
const DATA_START: i32 = 16;
const HEAP_START: i32 = 16 * 1024;

/// What a fixture plugin's process export does
#[derive(Debug, Clone)]
pub enum Behavior {
    /// ASCII-uppercase the input in place
    Uppercase,
    /// Always return this string
    Constant(String),
    /// Always report this failure message
    Fail(String),
    /// Execute `unreachable`
    Trap,
    /// Loop forever
    Spin,
    /// Increment a global and return its value as one digit
    Counter,
}

#[derive(Debug, Clone)]
pub struct FixturePlugin {
    pub name: String,
    pub description: String,
    pub type_name: Option<String>,
    pub behavior: Behavior,
    /// Declare the plugin in the manifest without emitting its export
    pub omit_export: bool,
}

impl FixturePlugin {
    pub fn new(name: &str, description: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            type_name: None,
            behavior,
            omit_export: false,
        }
    }

    pub fn type_name(mut self, type_name: &str) -> Self {
        self.type_name = Some(type_name.to_string());
        self
    }

    pub fn without_export(mut self) -> Self {
        self.omit_export = true;
        self
    }

    fn export(&self) -> String {
        format!("{}_process", self.name)
    }
}

pub fn constant(output: &str) -> Behavior {
    Behavior::Constant(output.to_string())
}

/// Build the WebAssembly text of an artifact declaring `plugins`
pub fn artifact_wat(plugins: &[FixturePlugin]) -> String {
    artifact_wat_with_version(plugins, API_VERSION)
}

pub fn artifact_wat_with_version(plugins: &[FixturePlugin], api_version: u32) -> String {
    let mut manifest = ArtifactManifest::new(Vec::new());
    manifest.api_version = api_version;
    for plugin in plugins {
        let mut spec = PluginSpec::new(&plugin.name, &plugin.description, plugin.export());
        if let Some(type_name) = &plugin.type_name {
            spec = spec.type_name(type_name);
        }
        manifest = manifest.plugin(spec);
    }
    let manifest_bytes = rmp_serde::to_vec(&manifest).unwrap();

    let mut data = Vec::new();
    let mut offset = DATA_START;
    let mut place = |bytes: &[u8]| -> i32 {
        let at = offset;
        data.push((at, bytes.to_vec()));
        offset += bytes.len() as i32;
        at
    };

    let manifest_ptr = place(&manifest_bytes);
    let mut funcs = String::new();

    for plugin in plugins.iter().filter(|p| !p.omit_export) {
        let body = match &plugin.behavior {
            Behavior::Uppercase => UPPERCASE_BODY.to_string(),
            Behavior::Constant(output) => {
                let ptr = place(output.as_bytes());
                format!("(i64.const {})", pack_ptr_len(ptr, output.len() as i32))
            }
            Behavior::Fail(message) => {
                let ptr = place(message.as_bytes());
                format!("(i64.const {})", pack_failure(ptr, message.len() as i32))
            }
            Behavior::Trap => "(unreachable)".to_string(),
            Behavior::Spin => "(loop $spin (br $spin)) (unreachable)".to_string(),
            Behavior::Counter => format!(
                "(global.set $count (i32.add (global.get $count) (i32.const 1)))
                 (i32.store8 (i32.const {scratch}) (i32.add (global.get $count) (i32.const 48)))
                 (i64.const {packed})",
                scratch = SCRATCH,
                packed = pack_ptr_len(SCRATCH, 1)
            ),
        };
        writeln!(
            funcs,
            "  (func (export \"{}\") (param $ptr i32) (param $len i32) (result i64)\n    (local $i i32) (local $c i32)\n    {})",
            plugin.export(),
            body
        )
        .unwrap();
    }

    assert!(offset < HEAP_START, "fixture data too large");

    let mut wat = String::new();
    writeln!(wat, "(module").unwrap();
    writeln!(wat, "  (memory (export \"memory\") 2)").unwrap();
    writeln!(wat, "  (global $heap (mut i32) (i32.const {}))", HEAP_START).unwrap();
    writeln!(wat, "  (global $count (mut i32) (i32.const 0))").unwrap();
    wat.push_str(ALLOCATOR);
    writeln!(
        wat,
        "  (func (export \"plugin_manifest\") (result i64) (i64.const {}))",
        pack_ptr_len(manifest_ptr, manifest_bytes.len() as i32)
    )
    .unwrap();
    for (at, bytes) in &data {
        writeln!(wat, "  (data (i32.const {}) \"{}\")", at, escape(bytes)).unwrap();
    }
    wat.push_str(&funcs);
    wat.push_str(")\n");
    wat
}

const ALLOCATOR: &str = r#"  (func (export "plugin_alloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $size)))
    (local.get $ptr))
  (func (export "plugin_dealloc") (param i32 i32))
"#;

const UPPERCASE_BODY: &str = r#"(block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $i) (local.get $len)))
        (local.set $c (i32.load8_u (i32.add (local.get $ptr) (local.get $i))))
        (if (i32.and (i32.ge_u (local.get $c) (i32.const 97))
                     (i32.le_u (local.get $c) (i32.const 122)))
          (then
            (i32.store8 (i32.add (local.get $ptr) (local.get $i))
                        (i32.sub (local.get $c) (i32.const 32)))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
      (i64.extend_i32_u (local.get $len)))"#;

fn escape(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\{:02x}", b)).collect()
}

pub fn write_fixture(dir: &Path, file_name: &str, plugins: &[FixturePlugin]) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, artifact_wat(plugins)).unwrap();
    path
}

/// Atomically replace an artifact and move its mtime `secs` into the future
pub fn replace_fixture(path: &Path, plugins: &[FixturePlugin], secs: u64) {
    let staging = path.with_extension("staging");
    std::fs::write(&staging, artifact_wat(plugins)).unwrap();
    bump_modified(&staging, secs);
    std::fs::rename(&staging, path).unwrap();
}

pub fn bump_modified(path: &Path, secs: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

pub fn upper() -> FixturePlugin {
    FixturePlugin::new("upper", "Convert input to uppercase", Behavior::Uppercase)
        .type_name("org.ivdnt.test.Upper")
}
