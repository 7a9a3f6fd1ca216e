//! Demo artifact declaring two plugins

use strand_plugin_sdk::prelude::*;

/// Convert to leetspeak
pub struct Leetify;

impl Plugin for Leetify {
    const NAME: &'static str = "leet";
    const DESCRIPTION: &'static str = "Replace some letters with their l33tsp34k equivalent";
    const TYPE_NAME: Option<&'static str> = Some("org.ivdnt.test.Leetify");

    fn process(input: &str) -> Result<String, String> {
        Ok(input
            .chars()
            .map(|c| match c {
                'a' | 'A' => '4',
                'e' | 'E' => '3',
                'o' | 'O' => '0',
                'i' | 'I' => '1',
                other => other,
            })
            .collect())
    }
}

pub struct DuplicateVowels;

impl Plugin for DuplicateVowels {
    const NAME: &'static str = "dupe";
    const DESCRIPTION: &'static str = "Duplicate vowels";
    const TYPE_NAME: Option<&'static str> = Some("org.ivdnt.test.DuplicateVowels");

    fn process(input: &str) -> Result<String, String> {
        let mut output = String::with_capacity(input.len() * 2);
        for c in input.chars() {
            output.push(c);
            if "aeiouAEIOU".contains(c) {
                output.push(c);
            }
        }
        Ok(output)
    }
}

export_plugins!(Leetify => leet_process, DuplicateVowels => dupe_process);
