//! ADO-style connection string parsing (`Key=Value;Key=Value`)

use anyhow::{bail, Result};
use std::collections::HashMap;

/// Parsed connection string with case-insensitive keys
#[derive(Clone, Debug, Default)]
pub struct ConnectionString {
    pairs: HashMap<String, String>,
}

impl ConnectionString {
    /// Parse `Key=Value` pairs separated by `;`. Values may be wrapped in
    /// single or double quotes. Empty segments are ignored.
    pub fn parse(input: &str) -> Result<Self> {
        let mut pairs = HashMap::new();
        for segment in input.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let Some((key, value)) = segment.split_once('=') else {
                bail!("Malformed connection string segment '{}': expected Key=Value", segment);
            };
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                bail!("Malformed connection string segment '{}': empty key", segment);
            }
            pairs.insert(key, unquote(value.trim()).to_string());
        }
        if pairs.is_empty() {
            bail!("Connection string is empty");
        }
        Ok(Self { pairs })
    }

    /// Look up the first of `keys` that is present
    pub fn get(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.pairs.get(&k.to_ascii_lowercase()))
            .map(String::as_str)
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
