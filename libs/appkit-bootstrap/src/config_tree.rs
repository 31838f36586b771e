//! Configuration tree assembled from "place" directories under the application root.
//!
//! Every `*.yaml`, `*.yml` or `*.json` file becomes a leaf named after its file stem and
//! every directory becomes an object node, so `config/services/http.yaml` ends up at
//! `config.services.http`. Anything else (keys, certificates, READMEs, dotfiles) is ignored.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Places loaded when the host does not configure its own list.
pub const DEFAULT_PLACES: &[&str] = &["config"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigTreeError {
    #[error("failed to list config directory '{}': {source}", path.display())]
    PlaceLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("config property '{property}' is defined more than once ('{}')", path.display())]
    Conflict { property: String, path: PathBuf },
    #[error("config section '{section}' has an unexpected shape: {source}")]
    Extract {
        section: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy)]
enum LeafFormat {
    Yaml,
    Json,
}

/// Immutable nested configuration, built once per application open.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTree {
    root: Value,
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl ConfigTree {
    /// Load every place directory below `app_root`. A place that cannot be listed is fatal.
    pub fn load<S: AsRef<str>>(app_root: &Path, places: &[S]) -> Result<Self, ConfigTreeError> {
        let mut root = Map::new();
        for place in places {
            let place = place.as_ref();
            let node = load_dir(&app_root.join(place), place)?;
            root.insert(place.to_string(), Value::Object(node));
        }
        tracing::debug!(root = %app_root.display(), places = places.len(), "config tree loaded");
        Ok(Self {
            root: Value::Object(root),
        })
    }

    /// Wrap an already assembled value; non-object values yield an empty tree.
    pub fn from_value(root: Value) -> Self {
        match root {
            Value::Object(_) => Self { root },
            _ => Self::default(),
        }
    }

    /// Look up a dotted property path such as `config.application.services`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|s| !s.is_empty())
            .try_fold(&self.root, |node, segment| node.get(segment))
    }

    pub fn place(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Deserialize the section at `path`, `None` when the section is absent.
    pub fn extract<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ConfigTreeError> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|source| ConfigTreeError::Extract {
                    section: path.to_string(),
                    source,
                }),
        }
    }

    pub fn extract_or_default<T: DeserializeOwned + Default>(
        &self,
        path: &str,
    ) -> Result<T, ConfigTreeError> {
        Ok(self.extract(path)?.unwrap_or_default())
    }
}

fn load_dir(dir: &Path, property: &str) -> Result<Map<String, Value>, ConfigTreeError> {
    let place_err = |source| ConfigTreeError::PlaceLoad {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = std::fs::read_dir(dir)
        .map_err(place_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(place_err)?;
    // Stable order keeps the tree (and conflict reports) deterministic.
    entries.sort_by_key(|e| e.file_name());

    let mut node = Map::new();
    for entry in entries {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 config entry");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let (key, value) = if path.is_dir() {
            let nested = load_dir(&path, &format!("{property}.{name}"))?;
            (name.to_string(), Value::Object(nested))
        } else if let Some((stem, format)) = leaf_stem(name) {
            (stem.to_string(), parse_leaf(&path, format)?)
        } else {
            continue;
        };

        if node.contains_key(&key) {
            return Err(ConfigTreeError::Conflict {
                property: format!("{property}.{key}"),
                path,
            });
        }
        node.insert(key, value);
    }
    Ok(node)
}

fn leaf_stem(name: &str) -> Option<(&str, LeafFormat)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    match ext.to_ascii_lowercase().as_str() {
        "yaml" | "yml" => Some((stem, LeafFormat::Yaml)),
        "json" => Some((stem, LeafFormat::Json)),
        _ => None,
    }
}

fn parse_leaf(path: &Path, format: LeafFormat) -> Result<Value, ConfigTreeError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigTreeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    let parsed = match format {
        LeafFormat::Yaml => serde_yaml::from_str::<Value>(&raw).map_err(|e| e.to_string()),
        LeafFormat::Json => serde_json::from_str::<Value>(&raw).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| ConfigTreeError::Parse {
        path: path.to_path_buf(),
        message,
    })
}
