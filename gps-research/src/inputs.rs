//! Static inputs: the entity list and prompt templates.

use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::info;

use gps_common::config::PathsConfig;
use gps_common::{Error, ResultExt};

use crate::providers::PromptContext;

/// One university to research.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    /// Homepage from the entity list, empty when absent
    pub url: String,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: String::new(),
        }
    }
}

const NAME_COLUMNS: &[&str] = &["name", "University_Name"];

/// Parse an entity list. The name column is `name` or `University_Name`;
/// a `url` column is optional. Blank names are skipped.
pub fn entities_from_reader<R: Read>(reader: R) -> gps_common::Result<Vec<Entity>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| Error::Parse(format!("entity list header: {e}")))?
        .clone();

    let name_idx = NAME_COLUMNS
        .iter()
        .find_map(|col| headers.iter().position(|h| h == *col))
        .ok_or_else(|| {
            Error::Parse(format!(
                "entity list has no name column (expected one of {})",
                NAME_COLUMNS.join(", ")
            ))
        })?;
    let url_idx = headers.iter().position(|h| h == "url");

    let mut entities = Vec::new();
    for (line, row) in rdr.records().enumerate() {
        let row = row.map_err(|e| Error::Parse(format!("entity row {}: {e}", line + 1)))?;
        let name = row.get(name_idx).unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        entities.push(Entity {
            name: name.to_string(),
            url: url_idx
                .and_then(|i| row.get(i))
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(entities)
}

pub fn load_entities(path: &Path) -> gps_common::Result<Vec<Entity>> {
    let file = fs::File::open(path).context(format!("opening {}", path.display()))?;
    let entities = entities_from_reader(file).context(format!("reading {}", path.display()))?;
    info!(path = %path.display(), count = entities.len(), "Loaded entity list");
    Ok(entities)
}

/// Prompt templates from the configured files, or the built-in defaults.
pub fn load_prompts(paths: &PathsConfig) -> gps_common::Result<PromptContext> {
    let mut prompts = PromptContext::default();
    if let Some(path) = &paths.prompt_file {
        prompts.research_template =
            fs::read_to_string(path).context(format!("reading {}", path.display()))?;
        info!(path = %path.display(), "Loaded research prompt");
    }
    if let Some(path) = &paths.validation_prompt_file {
        prompts.validation_template =
            fs::read_to_string(path).context(format!("reading {}", path.display()))?;
        info!(path = %path.display(), "Loaded validation prompt");
    }
    Ok(prompts)
}
