//! File-backed result cache.
//!
//! One pretty-printed JSON document per key at
//! `<root>/<namespace>/<clean_entity_name>.json`. Provider results live in a
//! namespace named after the provider; merged and validated records use
//! [`AGGREGATE_NAMESPACE`] and [`VALIDATED_NAMESPACE`]. There is no
//! time-based expiry: the files are the pipeline's only resume mechanism.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ResearchError, Result};
use crate::record::Usable;

/// Namespace for merged ensemble records.
pub const AGGREGATE_NAMESPACE: &str = "ensemble";

/// Namespace for post-validated records.
pub const VALIDATED_NAMESPACE: &str = "final";

/// Directory-per-namespace JSON cache.
#[derive(Debug, Clone)]
pub struct ResultCache {
    root: PathBuf,
}

impl ResultCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File-name form of an entity name: anything outside `[A-Za-z0-9 _-]`
    /// becomes `_`, spaces become `_`, and doubled underscores are collapsed once.
    pub fn clean_name(entity: &str) -> String {
        let replaced: String = entity
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, ' ' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        replaced.replace(' ', "_").replace("__", "_")
    }

    pub fn path(&self, namespace: &str, entity: &str) -> PathBuf {
        self.root
            .join(namespace)
            .join(format!("{}.json", Self::clean_name(entity)))
    }

    pub fn contains(&self, namespace: &str, entity: &str) -> bool {
        self.path(namespace, entity).is_file()
    }

    fn cache_error(path: &Path, message: impl std::fmt::Display) -> ResearchError {
        ResearchError::Cache {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// Read an entry as is.
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, entity: &str) -> Result<Option<T>> {
        let path = self.path(namespace, entity);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::cache_error(&path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Self::cache_error(&path, e))
    }

    /// Read an entry, deleting it when it is corrupt or fails the usability predicate.
    pub fn get_usable<T: DeserializeOwned + Usable>(
        &self,
        namespace: &str,
        entity: &str,
    ) -> Result<Option<T>> {
        let value = match self.get::<T>(namespace, entity) {
            Ok(value) => value,
            Err(ResearchError::Cache { path, message }) => {
                warn!(path = %path, error = %message, "Discarding unreadable cache entry");
                self.invalidate(namespace, entity)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match value {
            Some(value) if value.is_usable() => Ok(Some(value)),
            Some(_) => {
                debug!(namespace, entity, "Cached entry has no student data, discarding");
                self.invalidate(namespace, entity)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Write an entry atomically (temp file, then rename).
    pub fn put<T: Serialize>(&self, namespace: &str, entity: &str, value: &T) -> Result<()> {
        self.write(&self.path(namespace, entity), value)
    }

    /// Write under a file stem returned by [`ResultCache::entries`], unchanged.
    pub fn put_entry<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> Result<()> {
        self.write(&self.root.join(namespace).join(format!("{key}.json")), value)
    }

    fn write<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::cache_error(parent, e))?;
        }

        let body = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        };
        write().map_err(|e| Self::cache_error(path, e))?;
        debug!(path = %path.display(), "Cache entry written");
        Ok(())
    }

    /// Remove an entry. Returns whether one existed.
    pub fn invalidate(&self, namespace: &str, entity: &str) -> Result<bool> {
        let path = self.path(namespace, entity);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::cache_error(&path, e)),
        }
    }

    /// Every readable entry in a namespace, ordered by file name.
    pub fn list<T: DeserializeOwned>(&self, namespace: &str) -> Result<Vec<T>> {
        Ok(self
            .entries(namespace)?
            .into_iter()
            .map(|(_, item)| item)
            .collect())
    }

    /// Every readable entry with its file stem, ordered by file name.
    pub fn entries<T: DeserializeOwned>(&self, namespace: &str) -> Result<Vec<(String, T)>> {
        let dir = self.root.join(namespace);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::cache_error(&dir, e)),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()));
            match parsed {
                Ok(item) => items.push((key, item)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ProviderId, ProviderResult, ResearchRecord, Source};
    use chrono::NaiveDate;

    fn sample(undergrad: u64) -> ProviderResult {
        let mut record =
            ResearchRecord::empty("Test University", NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        record.students.undergrad = undergrad;
        record.students.masters = 300;
        record.gpus.h100_pcie_count = 10;
        record.add_source(Source::new("https://example.edu", "enrollment"));
        ProviderResult::new(ProviderId::Gemini, record)
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(ResultCache::clean_name("Test University"), "Test_University");
        assert_eq!(
            ResultCache::clean_name("University of California, Berkeley"),
            "University_of_California_Berkeley"
        );
        assert_eq!(
            ResultCache::clean_name("Texas A&M University"),
            "Texas_A_M_University"
        );
    }

    #[test]
    fn test_round_trip_field_for_field() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        let result = sample(1000);

        cache.put("gemini", "Test University", &result).unwrap();
        assert!(dir.path().join("gemini/Test_University.json").is_file());

        let loaded: ProviderResult = cache.get("gemini", "Test University").unwrap().unwrap();
        assert_eq!(loaded, result);
    }

    #[test]
    fn test_unusable_entry_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        let mut result = sample(0);
        result.record.students.masters = 0;

        cache.put("claude", "Test University", &result).unwrap();
        let loaded = cache
            .get_usable::<ProviderResult>("claude", "Test University")
            .unwrap();
        assert!(loaded.is_none());
        assert!(!cache.contains("claude", "Test University"));
    }

    #[test]
    fn test_corrupt_entry_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        fs::create_dir_all(dir.path().join("openai")).unwrap();
        fs::write(dir.path().join("openai/Test_University.json"), "{not json").unwrap();

        assert!(cache.get::<ProviderResult>("openai", "Test University").is_err());
        let loaded = cache
            .get_usable::<ProviderResult>("openai", "Test University")
            .unwrap();
        assert!(loaded.is_none());
        assert!(!cache.contains("openai", "Test University"));
    }

    #[test]
    fn test_invalidate_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        cache.put("final", "B University", &sample(5).record).unwrap();
        cache.put("final", "A University", &sample(7).record).unwrap();

        let all: Vec<ResearchRecord> = cache.list("final").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].students.undergrad, 7);

        assert!(cache.invalidate("final", "A University").unwrap());
        assert!(!cache.invalidate("final", "A University").unwrap());
        assert!(cache.list::<ResearchRecord>("missing").unwrap().is_empty());
    }

    #[test]
    fn test_entries_keep_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        cache.put("ensemble", "Texas A&M University", &sample(5).record).unwrap();

        let entries: Vec<(String, ResearchRecord)> = cache.entries("ensemble").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "Texas_A_M_University");

        cache.put_entry("final", &entries[0].0, &entries[0].1).unwrap();
        assert!(cache.contains("final", "Texas A&M University"));
    }
}
