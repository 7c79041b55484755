//! Flat environment-file parsing
//!
//! Node configuration lives in a flat `KEY=VALUE` namespace, one
//! assignment per line, `#`-prefixed comments. The file is re-read on
//! every lookup path that needs it, so edits take effect without a
//! restart.

use crate::Result;
use std::collections::BTreeMap;
use std::path::Path;

/// Parsed environment namespace.
#[derive(Debug, Clone, Default)]
pub struct EnvMap {
    vars: BTreeMap<String, String>,
}

impl EnvMap {
    /// Parse `KEY=VALUE` text. Lines without `=` and comment lines are
    /// ignored; keys and values are trimmed.
    pub fn parse(text: &str) -> Self {
        let mut vars = BTreeMap::new();
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            vars.insert(key.trim().to_string(), value.trim().to_string());
        }
        Self { vars }
    }

    /// Load an environment file. A missing file yields an empty map.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let env = EnvMap::parse("WG_INTERFACE=wg0\nWG_ENDPOINT_PORT=51820\n");
        assert_eq!(env.get("WG_INTERFACE"), Some("wg0"));
        assert_eq!(env.get("WG_ENDPOINT_PORT"), Some("51820"));
        assert_eq!(env.get("MISSING"), None);
    }

    #[test]
    fn test_parse_skips_comments_and_garbage() {
        let env = EnvMap::parse("# comment\n\nNOEQUALS\n  WG_DNS = 1.1.1.1, 8.8.8.8  \n");
        assert_eq!(env.get("WG_DNS"), Some("1.1.1.1, 8.8.8.8"));
        assert!(!env.contains("NOEQUALS"));
    }

    #[test]
    fn test_value_may_contain_equals() {
        let env = EnvMap::parse("WG_SERVER_PUBLIC_KEY=abc=def==\n");
        assert_eq!(env.get("WG_SERVER_PUBLIC_KEY"), Some("abc=def=="));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let env = EnvMap::load("/nonexistent/env_vars.txt").unwrap();
        assert!(env.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env_vars.txt");
        std::fs::write(&path, "BOT_TOKEN=secret\n# note\nADMIN_ID=7\n").unwrap();
        let env = EnvMap::load(&path).unwrap();
        assert_eq!(env.get("BOT_TOKEN"), Some("secret"));
        assert_eq!(env.get("ADMIN_ID"), Some("7"));
    }
}
