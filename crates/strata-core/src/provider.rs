//! Data providers
//!
//! A provider pairs a data function with the locations of one hierarchy
//! entry. Functions come in three shapes: `data_hash` loads an entire
//! mapping per location, `data_key` resolves a single key, and `data_dig`
//! walks nested segments itself. Functions are looked up by name in a
//! `FunctionRegistry`; each engine owns its registry so tests can isolate
//! theirs, while most sessions share the process-wide default.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use indexmap::IndexMap;

use crate::error::{Error, ErrorKind, Result};
use crate::interpolate::{interpolate_value, SubLookup};
use crate::invocation::Invocation;
use crate::key::Key;
use crate::location::{Location, ResolvedLocation};
use crate::merge::MergeStrategy;
use crate::value::Value;

/// The three provider function shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    DataHash,
    DataKey,
    DataDig,
}

impl FunctionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::DataHash => "data_hash",
            FunctionKind::DataKey => "data_key",
            FunctionKind::DataDig => "data_dig",
        }
    }
}

/// Context handed to provider functions
pub struct ProviderContext<'a> {
    /// Merged options: entry options, call options, reserved location keys
    pub options: &'a IndexMap<String, Value>,
    /// The location being read, absent for location-less providers
    pub location: Option<&'a ResolvedLocation>,
    /// The registry the provider was resolved from, for multiplexers
    pub registry: &'a FunctionRegistry,
}

impl ProviderContext<'_> {
    /// An option the function cannot work without
    pub fn required_option(&self, name: &str) -> Result<&Value> {
        self.options
            .get(name)
            .ok_or_else(|| Error::missing_required_option(name))
    }

    /// The resolved path of the current location
    pub fn location_path(&self) -> Result<&str> {
        self.location
            .map(|l| l.resource.as_str())
            .ok_or_else(|| Error::missing_required_option("path"))
    }
}

pub type DataHashFn = Arc<dyn Fn(&ProviderContext<'_>) -> Result<Value> + Send + Sync>;
pub type DataKeyFn =
    Arc<dyn Fn(&ProviderContext<'_>, &str) -> Result<Option<Value>> + Send + Sync>;
pub type DataDigFn =
    Arc<dyn Fn(&ProviderContext<'_>, &Key) -> Result<Option<Value>> + Send + Sync>;

/// Registry of provider functions, one table per kind
#[derive(Default)]
pub struct FunctionRegistry {
    data_hash: HashMap<String, DataHashFn>,
    data_key: HashMap<String, DataKeyFn>,
    data_dig: HashMap<String, DataDigFn>,
}

impl FunctionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in functions registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_data_hash("yaml_data", yaml_data);
        registry.register_data_hash("json_data", json_data);
        registry.register_data_key("environment", environment);
        registry.register_data_key("mux", mux);
        registry
    }

    /// The shared process-wide registry
    pub fn global() -> Arc<FunctionRegistry> {
        static GLOBAL: OnceLock<Arc<FunctionRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(FunctionRegistry::with_builtins()))
            .clone()
    }

    pub fn register_data_hash<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&ProviderContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.data_hash.insert(name.into(), Arc::new(f));
    }

    pub fn register_data_key<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&ProviderContext<'_>, &str) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.data_key.insert(name.into(), Arc::new(f));
    }

    pub fn register_data_dig<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&ProviderContext<'_>, &Key) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.data_dig.insert(name.into(), Arc::new(f));
    }

    pub fn data_hash(&self, name: &str) -> Option<DataHashFn> {
        self.data_hash.get(name).cloned()
    }

    pub fn data_key(&self, name: &str) -> Option<DataKeyFn> {
        self.data_key.get(name).cloned()
    }

    pub fn data_dig(&self, name: &str) -> Option<DataDigFn> {
        self.data_dig.get(name).cloned()
    }

    /// Fails unless `name` is registered under `kind`
    pub fn check(&self, kind: FunctionKind, name: &str) -> Result<()> {
        let known = match kind {
            FunctionKind::DataHash => self.data_hash.contains_key(name),
            FunctionKind::DataKey => self.data_key.contains_key(name),
            FunctionKind::DataDig => self.data_dig.contains_key(name),
        };
        if known {
            Ok(())
        } else {
            Err(Error::unknown_function(kind.as_str(), name))
        }
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("data_hash", &self.data_hash.keys())
            .field("data_key", &self.data_key.keys())
            .field("data_dig", &self.data_dig.keys())
            .finish()
    }
}

/// A provider: one hierarchy entry's function bound to its locations
#[derive(Debug)]
pub struct DataProvider {
    entry_name: String,
    kind: FunctionKind,
    function_name: String,
    locations: Vec<Location>,
    data_dir: PathBuf,
    options: IndexMap<String, Value>,
    // Raw data_hash results per resolved resource; the per-resource cell
    // guarantees at most one load even under concurrent invocations
    hash_cache: Mutex<HashMap<String, Arc<OnceLock<Result<Arc<Value>>>>>>,
}

impl DataProvider {
    pub fn new(
        entry_name: impl Into<String>,
        kind: FunctionKind,
        function_name: impl Into<String>,
        locations: Vec<Location>,
        data_dir: PathBuf,
        options: IndexMap<String, Value>,
    ) -> Self {
        Self {
            entry_name: entry_name.into(),
            kind,
            function_name: function_name.into(),
            locations,
            data_dir,
            options,
            hash_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// Descriptive name used by the explainer
    pub fn full_name(&self) -> String {
        format!(
            "Hierarchy entry \"{}\" ({} \"{}\")",
            self.entry_name,
            self.kind.as_str(),
            self.function_name
        )
    }

    /// Look up `key` through this provider, visiting locations in declared
    /// order under the given merge strategy.
    pub(crate) fn lookup<E: SubLookup>(
        &self,
        engine: &E,
        registry: &FunctionRegistry,
        inv: &mut Invocation,
        key: &Key,
        strategy: &MergeStrategy,
        call_options: &IndexMap<String, Value>,
    ) -> Result<Option<Value>> {
        inv.with_data_provider(&self.full_name(), |inv| {
            let variants = self.resolve_locations(engine, inv)?;
            strategy.lookup(&variants, inv, |location, inv| {
                self.lookup_in_location(engine, registry, inv, key, location.as_ref(), call_options)
            })
        })
    }

    /// Resolve declared locations; a provider without locations runs once
    fn resolve_locations<E: SubLookup>(
        &self,
        engine: &E,
        inv: &mut Invocation,
    ) -> Result<Vec<Option<ResolvedLocation>>> {
        if self.locations.is_empty() {
            return Ok(vec![None]);
        }
        let mut variants = Vec::new();
        for location in &self.locations {
            for resolved in location.resolve(engine, inv, &self.data_dir)? {
                variants.push(Some(resolved));
            }
        }
        Ok(variants)
    }

    fn lookup_in_location<E: SubLookup>(
        &self,
        engine: &E,
        registry: &FunctionRegistry,
        inv: &mut Invocation,
        key: &Key,
        location: Option<&ResolvedLocation>,
        call_options: &IndexMap<String, Value>,
    ) -> Result<Option<Value>> {
        let run = |inv: &mut Invocation| -> Result<Option<Value>> {
            if let Some(loc) = location {
                if !loc.exists {
                    inv.report_location_not_found();
                    return Ok(None);
                }
            }
            let options = self.merged_options(location, call_options);
            let ctx = ProviderContext {
                options: &options,
                location,
                registry,
            };

            let found = match self.kind {
                FunctionKind::DataHash => {
                    let hash = self.load_hash(registry, &ctx)?;
                    match hash.as_mapping().and_then(|m| m.get(key.root())) {
                        Some(root) => key.dig(inv, root.clone())?,
                        None => None,
                    }
                }
                FunctionKind::DataKey => {
                    let f = registry.data_key(&self.function_name).ok_or_else(|| {
                        Error::unknown_function(self.kind.as_str(), &self.function_name)
                    })?;
                    match f(&ctx, key.root())? {
                        Some(root) => key.dig(inv, root)?,
                        None => None,
                    }
                }
                FunctionKind::DataDig => {
                    let f = registry.data_dig(&self.function_name).ok_or_else(|| {
                        Error::unknown_function(self.kind.as_str(), &self.function_name)
                    })?;
                    f(&ctx, key)?
                }
            };

            match found {
                Some(value) => {
                    let value = interpolate_value(engine, inv, &value)?;
                    inv.report_found(key.original(), &value);
                    Ok(Some(value))
                }
                None => {
                    inv.report_not_found(key.original());
                    Ok(None)
                }
            }
        };

        match location {
            Some(loc) => inv.with_location(&loc.resource, run),
            None => run(inv),
        }
    }

    /// Entry options, call options on top, reserved location keys last
    fn merged_options(
        &self,
        location: Option<&ResolvedLocation>,
        call_options: &IndexMap<String, Value>,
    ) -> IndexMap<String, Value> {
        let mut options = self.options.clone();
        for (k, v) in call_options {
            if k != "merge" {
                options.insert(k.clone(), v.clone());
            }
        }
        if let Some(loc) = location {
            let reserved = match self.locations.first() {
                Some(Location::Uri(_)) => "uri",
                _ => "path",
            };
            options.insert(reserved.to_string(), Value::String(loc.resource.clone()));
        }
        options
    }

    /// Load and cache the full mapping of a data_hash location
    fn load_hash(&self, registry: &FunctionRegistry, ctx: &ProviderContext<'_>) -> Result<Arc<Value>> {
        let cache_key = ctx
            .location
            .map(|l| l.resource.clone())
            .unwrap_or_default();
        let cell = {
            let mut cache = self.hash_cache.lock().unwrap();
            cache
                .entry(cache_key)
                .or_insert_with(|| Arc::new(OnceLock::new()))
                .clone()
        };
        cell.get_or_init(|| {
            let f = registry.data_hash(&self.function_name).ok_or_else(|| {
                Error::unknown_function(self.kind.as_str(), &self.function_name)
            })?;
            let value = f(ctx)?;
            if !value.is_mapping() {
                return Err(Error::new(ErrorKind::YamlNotHash {
                    path: ctx.location.map(|l| l.resource.clone()).unwrap_or_default(),
                }));
            }
            Ok(Arc::new(value))
        })
        .clone()
    }
}

/// Built-in data_hash function reading a YAML document
fn yaml_data(ctx: &ProviderContext<'_>) -> Result<Value> {
    let path = ctx.location_path()?;
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("failed to read '{}': {}", path, e)))?;
    // An empty document is an empty mapping, not an error
    if text.trim().is_empty() {
        return Ok(Value::Mapping(IndexMap::new()));
    }
    let value = Value::parse_yaml(&text)
        .map_err(|e| e.with_context("path", path))?;
    if !value.is_mapping() {
        return Err(Error::new(ErrorKind::YamlNotHash { path: path.into() }));
    }
    Ok(value)
}

/// Built-in data_hash function reading a JSON document
fn json_data(ctx: &ProviderContext<'_>) -> Result<Value> {
    let path = ctx.location_path()?;
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("failed to read '{}': {}", path, e)))?;
    let value = Value::parse_json(&text)
        .map_err(|e| e.with_context("path", path))?;
    if !value.is_mapping() {
        return Err(Error::new(ErrorKind::YamlNotHash { path: path.into() }));
    }
    Ok(value)
}

/// Built-in data_key function reading process environment variables
fn environment(_ctx: &ProviderContext<'_>, key: &str) -> Result<Option<Value>> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(Value::String(value))),
        Err(_) => Ok(None),
    }
}

/// Built-in data_key multiplexer: tries the data_key functions named in
/// the `functions` option in order and returns the first hit
fn mux(ctx: &ProviderContext<'_>, key: &str) -> Result<Option<Value>> {
    let functions = ctx.required_option("functions")?;
    let Some(names) = functions.as_sequence() else {
        return Err(Error::missing_required_option("functions")
            .with_context("detail", "'functions' must be a sequence of data_key names"));
    };
    for name in names {
        let Some(name) = name.as_str() else {
            continue;
        };
        let f = ctx
            .registry
            .data_key(name)
            .ok_or_else(|| Error::unknown_function("data_key", name))?;
        if let Some(found) = f(ctx, key)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}
