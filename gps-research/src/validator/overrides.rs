//! Known-good fallback pages per entity, used when every cited source fails.

use std::collections::HashMap;
use std::path::Path;

use gps_common::error::{Error, Result, ResultExt};

/// Entity name to fallback URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackOverrides {
    entries: HashMap<String, String>,
}

impl Default for FallbackOverrides {
    fn default() -> Self {
        let entries = [
            (
                "Princeton University",
                "https://pli.princeton.edu/about-pli/directors-message",
            ),
            (
                "Stanford University",
                "https://datascience.stanford.edu/system-specifications",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { entries }
    }
}

impl FallbackOverrides {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Built-in entries, extended (and overridden) by a JSON object file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut overrides = Self::default();
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .context(format!("reading overrides file {}", path.display()))?;
            let extra: HashMap<String, String> = serde_json::from_str(&content).map_err(|e| {
                Error::Parse(format!("overrides file {}: {e}", path.display()))
            })?;
            for (entity, url) in extra {
                overrides.insert(entity, url);
            }
        }
        Ok(overrides)
    }

    pub fn insert(&mut self, entity: impl Into<String>, url: impl Into<String>) {
        self.entries.insert(entity.into(), url.into());
    }

    pub fn get(&self, entity: &str) -> Option<&str> {
        self.entries.get(entity.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_entries() {
        let overrides = FallbackOverrides::default();
        assert_eq!(
            overrides.get("Stanford University"),
            Some("https://datascience.stanford.edu/system-specifications")
        );
        assert!(overrides.get("MIT").is_none());
    }

    #[test]
    fn test_file_extends_builtins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"MIT": "https://mit.edu/gpus", "Stanford University": "https://example.edu/s"}}"#
        )
        .unwrap();

        let overrides = FallbackOverrides::load(Some(file.path())).unwrap();
        assert_eq!(overrides.len(), 3);
        assert_eq!(overrides.get("MIT"), Some("https://mit.edu/gpus"));
        assert_eq!(overrides.get("Stanford University"), Some("https://example.edu/s"));
    }

    #[test]
    fn test_bad_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = FallbackOverrides::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
