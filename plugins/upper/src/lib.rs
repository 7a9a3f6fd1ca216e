//! Demo artifact with a single plugin
//!
//! Build with `cargo build --release --target wasm32-unknown-unknown` and
//! copy `strand_plugin_upper.wasm` into the plugin directory.

use strand_plugin_sdk::prelude::*;

pub struct Upper;

impl Plugin for Upper {
    const NAME: &'static str = "upper";
    const DESCRIPTION: &'static str = "Convert input to uppercase";
    const TYPE_NAME: Option<&'static str> = Some("org.ivdnt.test.Upper");

    fn process(input: &str) -> Result<String, String> {
        Ok(input.to_uppercase())
    }
}

export_plugins!(Upper => upper_process);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper() {
        assert_eq!(Upper::process("abc").unwrap(), "ABC");
        assert_eq!(Upper::process("straße").unwrap(), "STRASSE");
    }
}
