//! Configuration document loading
//!
//! The hierarchy is declared in `strata.yaml` at the engine root (or an
//! absolute override). The document carries a `version` (always 5), a
//! `defaults` fragment merged into every entry, the ordered `hierarchy`,
//! and an optional `default_hierarchy` consulted when the regular one
//! produces nothing. Resolving a config turns every entry into a concrete
//! `DataProvider`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;

use crate::error::{Error, ErrorKind, Result};
use crate::location::Location;
use crate::provider::{DataProvider, FunctionKind, FunctionRegistry};
use crate::value::Value;

/// Default configuration file name under the engine root
pub const CONFIG_FILE_NAME: &str = "strata.yaml";

/// The reserved key whose value maps lookup keys to per-key defaults
pub const LOOKUP_OPTIONS: &str = "lookup_options";

const FUNCTION_KEYS: [(&str, FunctionKind); 3] = [
    ("data_hash", FunctionKind::DataHash),
    ("data_key", FunctionKind::DataKey),
    ("data_dig", FunctionKind::DataDig),
];

const LOCATION_KEYS: [&str; 7] = [
    "path", "paths", "glob", "globs", "uri", "uris", "mapped_paths",
];

const RESERVED_OPTION_KEYS: [&str; 2] = ["path", "uri"];

/// One hierarchy entry as declared, before defaults are applied
#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub name: String,
    pub kind: Option<FunctionKind>,
    pub function_name: Option<String>,
    pub data_dir: Option<String>,
    pub locations: Option<Vec<Location>>,
    pub options: IndexMap<String, Value>,
}

impl Entry {
    fn from_value(value: &Value, require_name: bool) -> Result<Entry> {
        let Some(map) = value.as_mapping() else {
            return Err(Error::config("hierarchy entry must be a mapping"));
        };

        let name = match map.get("name") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(Error::config("entry 'name' must be a string")),
            None if require_name => {
                return Err(Error::config("hierarchy entry is missing 'name'"))
            }
            None => String::new(),
        };

        let mut kind = None;
        let mut function_name = None;
        for (key, k) in FUNCTION_KEYS {
            if let Some(v) = map.get(key) {
                if kind.is_some() {
                    return Err(Error::config(format!(
                        "entry '{}' declares more than one function kind",
                        name
                    )));
                }
                let Some(f) = v.as_str() else {
                    return Err(Error::config(format!("'{}' must be a function name", key)));
                };
                kind = Some(k);
                function_name = Some(f.to_string());
            }
        }

        let mut locations = None;
        for key in LOCATION_KEYS {
            if let Some(v) = map.get(key) {
                if locations.is_some() {
                    return Err(Error::config(format!(
                        "entry '{}' declares more than one location kind",
                        name
                    )));
                }
                locations = Some(parse_locations(key, v)?);
            }
        }

        let mut options = IndexMap::new();
        if let Some(v) = map.get("options") {
            let Some(option_map) = v.as_mapping() else {
                return Err(Error::config("entry 'options' must be a mapping"));
            };
            for (k, v) in option_map {
                if RESERVED_OPTION_KEYS.contains(&k.as_str()) {
                    return Err(Error::config(format!(
                        "option key '{}' is reserved",
                        k
                    )));
                }
                options.insert(k.clone(), v.clone());
            }
        }

        let data_dir = match map.get("datadir") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(Error::config("entry 'datadir' must be a string")),
            None => None,
        };

        Ok(Entry {
            name,
            kind,
            function_name,
            data_dir,
            locations,
            options,
        })
    }

    /// Merge the defaults fragment into this entry, non-nil child wins
    fn resolve(&self, defaults: Option<&Entry>) -> Entry {
        let mut resolved = self.clone();
        let Some(defaults) = defaults else {
            return resolved;
        };
        if resolved.kind.is_none() {
            resolved.kind = defaults.kind;
            resolved.function_name = defaults.function_name.clone();
        }
        if resolved.data_dir.is_none() {
            resolved.data_dir = defaults.data_dir.clone();
        }
        if resolved.locations.is_none() {
            resolved.locations = defaults.locations.clone();
        }
        for (k, v) in &defaults.options {
            if !resolved.options.contains_key(k) {
                resolved.options.insert(k.clone(), v.clone());
            }
        }
        resolved
    }
}

fn parse_locations(key: &str, value: &Value) -> Result<Vec<Location>> {
    let singles = |v: &Value| -> Result<String> {
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::config(format!("location '{}' must be a string", key)))
    };
    let many = |v: &Value| -> Result<Vec<String>> {
        match v.as_sequence() {
            Some(seq) => seq.iter().map(singles).collect(),
            None => Err(Error::config(format!(
                "location '{}' must be a sequence",
                key
            ))),
        }
    };
    Ok(match key {
        "path" => vec![Location::Path(singles(value)?)],
        "paths" => many(value)?.into_iter().map(Location::Path).collect(),
        "glob" => vec![Location::Glob(singles(value)?)],
        "globs" => many(value)?.into_iter().map(Location::Glob).collect(),
        "uri" => vec![Location::Uri(singles(value)?)],
        "uris" => many(value)?.into_iter().map(Location::Uri).collect(),
        "mapped_paths" => {
            let parts = many(value)?;
            let [key, var, template] = parts.as_slice() else {
                return Err(Error::config(
                    "'mapped_paths' must be [scope key, variable, template]",
                ));
            };
            vec![Location::MappedPath {
                key: key.clone(),
                var: var.clone(),
                template: template.clone(),
            }]
        }
        _ => unreachable!(),
    })
}

/// The parsed configuration document
#[derive(Debug)]
pub struct Config {
    root: PathBuf,
    path: PathBuf,
    defaults: Option<Entry>,
    hierarchy: Vec<Entry>,
    default_hierarchy: Vec<Entry>,
}

impl Config {
    /// Load `<root>/strata.yaml`, or the given absolute override. A missing
    /// config file yields the default hierarchy: a single `Common` entry
    /// reading `common.yaml` with `yaml_data`.
    pub fn load(root: impl Into<PathBuf>, config_path: Option<&Path>) -> Result<Config> {
        let root = root.into();
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => root.join(CONFIG_FILE_NAME),
        };
        if !path.is_file() {
            log::debug!(
                "no configuration at {}, using the default hierarchy",
                path.display()
            );
            return Ok(Config::default_config(root, path));
        }

        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::io(format!("failed to read '{}': {}", path.display(), e)))?;
        let doc = Value::parse_yaml(&text)
            .map_err(|e| e.with_context("path", path.display().to_string()))?;
        let Some(map) = doc.as_mapping() else {
            return Err(Error::config("configuration must be a mapping")
                .with_context("path", path.display().to_string()));
        };

        match map.get("version") {
            Some(Value::Int(5)) => {}
            Some(Value::Int(v)) => {
                return Err(Error::new(ErrorKind::InvalidConfigVersion { version: *v }))
            }
            Some(_) => return Err(Error::config("'version' must be an integer")),
            None => return Err(Error::config("missing required key 'version'")),
        }

        let defaults = map
            .get("defaults")
            .map(|v| Entry::from_value(v, false))
            .transpose()?;

        let hierarchy = Self::parse_hierarchy(map.get("hierarchy"))?;
        let default_hierarchy = Self::parse_hierarchy(map.get("default_hierarchy"))?;

        log::debug!(
            "loaded configuration from {} ({} hierarchy entries)",
            path.display(),
            hierarchy.len()
        );

        Ok(Config {
            root,
            path,
            defaults,
            hierarchy,
            default_hierarchy,
        })
    }

    fn default_config(root: PathBuf, path: PathBuf) -> Config {
        Config {
            root,
            path,
            defaults: None,
            hierarchy: vec![Entry {
                name: "Common".to_string(),
                kind: Some(FunctionKind::DataHash),
                function_name: Some("yaml_data".to_string()),
                data_dir: None,
                locations: Some(vec![Location::Path("common.yaml".to_string())]),
                options: IndexMap::new(),
            }],
            default_hierarchy: Vec::new(),
        }
    }

    fn parse_hierarchy(value: Option<&Value>) -> Result<Vec<Entry>> {
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let Some(seq) = value.as_sequence() else {
            return Err(Error::config("'hierarchy' must be a sequence"));
        };
        let mut entries = Vec::with_capacity(seq.len());
        let mut seen = Vec::new();
        for v in seq {
            let entry = Entry::from_value(v, true)?;
            if seen.contains(&entry.name) {
                return Err(Error::new(ErrorKind::DuplicateEntryName {
                    name: entry.name,
                }));
            }
            seen.push(entry.name.clone());
            entries.push(entry);
        }
        Ok(entries)
    }

    /// The directory holding this config
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The full path to this config
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hierarchy(&self) -> &[Entry] {
        &self.hierarchy
    }

    pub fn default_hierarchy(&self) -> &[Entry] {
        &self.default_hierarchy
    }

    /// Resolve into concrete providers, validating function names
    pub fn resolve(self: Arc<Self>, registry: &FunctionRegistry) -> Result<ResolvedConfig> {
        let providers = self.resolve_entries(&self.hierarchy, registry)?;
        let default_providers = self.resolve_entries(&self.default_hierarchy, registry)?;
        Ok(ResolvedConfig {
            config: self,
            providers,
            default_providers,
            lookup_options: OnceLock::new(),
        })
    }

    fn resolve_entries(
        &self,
        entries: &[Entry],
        registry: &FunctionRegistry,
    ) -> Result<Vec<DataProvider>> {
        entries
            .iter()
            .map(|entry| {
                let resolved = entry.resolve(self.defaults.as_ref());
                let (Some(kind), Some(function_name)) =
                    (resolved.kind, resolved.function_name.clone())
                else {
                    return Err(Error::config(format!(
                        "entry '{}' declares no data function",
                        resolved.name
                    )));
                };
                registry.check(kind, &function_name)?;
                let data_dir = self
                    .root
                    .join(resolved.data_dir.as_deref().unwrap_or("data"));
                Ok(DataProvider::new(
                    resolved.name,
                    kind,
                    function_name,
                    resolved.locations.unwrap_or_default(),
                    data_dir,
                    resolved.options,
                ))
            })
            .collect()
    }
}

/// A config with its providers, shared for the engine session lifetime
#[derive(Debug)]
pub struct ResolvedConfig {
    config: Arc<Config>,
    providers: Vec<DataProvider>,
    default_providers: Vec<DataProvider>,
    // Resolved `lookup_options` mapping, computed on the first lookup
    lookup_options: OnceLock<Option<Value>>,
}

impl ResolvedConfig {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn providers(&self) -> &[DataProvider] {
        &self.providers
    }

    pub fn default_providers(&self) -> &[DataProvider] {
        &self.default_providers
    }

    pub(crate) fn lookup_options_cache(&self) -> &OnceLock<Option<Value>> {
        &self.lookup_options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(dir: &Path, body: &str) {
        fs::write(dir.join(CONFIG_FILE_NAME), body).unwrap();
    }

    #[test]
    fn test_load_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "version: 5\nhierarchy:\n  - name: Common\n    data_hash: yaml_data\n    path: common.yaml\n",
        );

        let config = Config::load(dir.path(), None).unwrap();
        assert_eq!(config.hierarchy().len(), 1);
        let entry = &config.hierarchy()[0];
        assert_eq!(entry.name, "Common");
        assert_eq!(entry.kind, Some(FunctionKind::DataHash));
        assert_eq!(
            entry.locations,
            Some(vec![Location::Path("common.yaml".into())])
        );
    }

    #[test]
    fn test_missing_config_uses_default_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path(), None).unwrap();
        assert_eq!(config.hierarchy().len(), 1);
        assert_eq!(config.hierarchy()[0].name, "Common");
        assert_eq!(config.hierarchy()[0].function_name.as_deref(), Some("yaml_data"));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "version: 3\nhierarchy: []\n");
        let err = Config::load(dir.path(), None).unwrap_err();
        assert_eq!(err.kind_name(), "invalid-config-version");

        write_config(dir.path(), "hierarchy: []\n");
        assert!(Config::load(dir.path(), None).is_err());
    }

    #[test]
    fn test_duplicate_entry_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "version: 5\nhierarchy:\n  - name: A\n    data_hash: yaml_data\n    path: a.yaml\n  - name: A\n    data_hash: yaml_data\n    path: b.yaml\n",
        );
        let err = Config::load(dir.path(), None).unwrap_err();
        assert_eq!(err.kind_name(), "duplicate-entry-name");
    }

    #[test]
    fn test_two_function_kinds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "version: 5\nhierarchy:\n  - name: A\n    data_hash: yaml_data\n    data_key: environment\n    path: a.yaml\n",
        );
        assert!(Config::load(dir.path(), None).is_err());
    }

    #[test]
    fn test_two_location_kinds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "version: 5\nhierarchy:\n  - name: A\n    data_hash: yaml_data\n    path: a.yaml\n    glob: \"*.yaml\"\n",
        );
        assert!(Config::load(dir.path(), None).is_err());
    }

    #[test]
    fn test_reserved_option_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "version: 5\nhierarchy:\n  - name: A\n    data_hash: yaml_data\n    path: a.yaml\n    options:\n      path: elsewhere\n",
        );
        assert!(Config::load(dir.path(), None).is_err());
    }

    #[test]
    fn test_defaults_merge_into_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            concat!(
                "version: 5\n",
                "defaults:\n",
                "  data_hash: yaml_data\n",
                "  datadir: layers\n",
                "  options:\n",
                "    shared: common\n",
                "hierarchy:\n",
                "  - name: Nodes\n",
                "    path: nodes.yaml\n",
                "    options:\n",
                "      shared: overridden\n",
                "  - name: Common\n",
                "    path: common.yaml\n",
            ),
        );

        let config = Arc::new(Config::load(dir.path(), None).unwrap());
        let resolved = config.resolve(&FunctionRegistry::with_builtins()).unwrap();

        assert_eq!(resolved.providers().len(), 2);
        assert_eq!(resolved.providers()[0].entry_name(), "Nodes");
        assert_eq!(resolved.providers()[0].kind(), FunctionKind::DataHash);
    }

    #[test]
    fn test_unknown_function_rejected_at_resolve() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "version: 5\nhierarchy:\n  - name: A\n    data_hash: xml_data\n    path: a.yaml\n",
        );
        let config = Arc::new(Config::load(dir.path(), None).unwrap());
        let err = config.resolve(&FunctionRegistry::with_builtins()).unwrap_err();
        assert_eq!(err.kind_name(), "unknown-function");
    }

    #[test]
    fn test_mapped_paths_shape() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "version: 5\nhierarchy:\n  - name: Mapped\n    data_hash: yaml_data\n    mapped_paths: [services, svc, \"svc/%{svc}.yaml\"]\n",
        );
        let config = Config::load(dir.path(), None).unwrap();
        assert_eq!(
            config.hierarchy()[0].locations,
            Some(vec![Location::MappedPath {
                key: "services".into(),
                var: "svc".into(),
                template: "svc/%{svc}.yaml".into(),
            }])
        );
    }

    #[test]
    fn test_entry_missing_function_after_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "version: 5\nhierarchy:\n  - name: A\n    path: a.yaml\n",
        );
        let config = Arc::new(Config::load(dir.path(), None).unwrap());
        assert!(config.resolve(&FunctionRegistry::with_builtins()).is_err());
    }
}
