use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{FixtureAdapter, LinkedInAdapter, RemoteOkAdapter, SourceAdapter, WeWorkRemotelyAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Remoteok,
    Linkedin,
    Weworkremotely,
    Fixture,
}

/// One entry of `sources.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            url: None,
            path: None,
            query: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesFile {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("source {0} is listed more than once")]
    DuplicateName(String),
    #[error("fixture source {0} needs a `path`")]
    MissingPath(String),
}

/// RemoteOK plus LinkedIn guest search.
pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new("remoteok", SourceKind::Remoteok),
        SourceConfig::new("linkedin", SourceKind::Linkedin),
    ]
}

/// Loads the source list. A missing file means the default pair; an unreadable or
/// malformed file is an error.
pub fn load_sources(path: impl AsRef<Path>) -> Result<Vec<SourceConfig>, RegistryError> {
    let path = path.as_ref();
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no sources file, using defaults");
            return Ok(default_sources());
        }
        Err(source) => {
            return Err(RegistryError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let file: SourcesFile = serde_yaml::from_str(&text).map_err(|source| RegistryError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file.sources)
}

/// Instantiates the enabled adapters in file order.
pub fn build_adapters(sources: &[SourceConfig]) -> Result<Vec<Arc<dyn SourceAdapter>>, RegistryError> {
    let mut seen = BTreeSet::new();
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    for source in sources {
        if !seen.insert(source.name.as_str()) {
            return Err(RegistryError::DuplicateName(source.name.clone()));
        }
        if !source.enabled {
            warn!(source = %source.name, "source disabled");
            continue;
        }
        let adapter: Arc<dyn SourceAdapter> = match source.kind {
            SourceKind::Remoteok => Arc::new(RemoteOkAdapter::new(&source.name, source.url.clone())),
            SourceKind::Linkedin => Arc::new(LinkedInAdapter::new(
                &source.name,
                source.url.clone(),
                source.query.clone(),
            )),
            SourceKind::Weworkremotely => {
                Arc::new(WeWorkRemotelyAdapter::new(&source.name, source.url.clone()))
            }
            SourceKind::Fixture => {
                let path = source
                    .path
                    .clone()
                    .ok_or_else(|| RegistryError::MissingPath(source.name.clone()))?;
                Arc::new(FixtureAdapter::new(&source.name, path))
            }
        };
        adapters.push(adapter);
    }
    Ok(adapters)
}
