//! Data locations
//!
//! A hierarchy entry points its provider at one or more locations: a file
//! path, a glob, a URI, or a mapped path set driven by a scope variable.
//! Location strings may interpolate the scope, so resolution happens per
//! invocation and produces zero or more concrete resources.

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::interpolate::{interpolate_string, SubLookup};
use crate::invocation::Invocation;
use crate::value::Value;

/// A declared location, before resolution
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Path(String),
    Glob(String),
    Uri(String),
    /// `[key, var, template]`: one path per element of the scope value at
    /// `key`, with the element bound to `var` while the template expands
    MappedPath {
        key: String,
        var: String,
        template: String,
    },
}

impl Location {
    pub fn kind(&self) -> &'static str {
        match self {
            Location::Path(_) => "path",
            Location::Glob(_) => "glob",
            Location::Uri(_) => "uri",
            Location::MappedPath { .. } => "mapped_paths",
        }
    }

    /// Resolve to concrete resources relative to `data_dir`
    pub(crate) fn resolve<E: SubLookup>(
        &self,
        engine: &E,
        inv: &mut Invocation,
        data_dir: &Path,
    ) -> Result<Vec<ResolvedLocation>> {
        match self {
            Location::Path(template) => {
                let path = anchor(data_dir, &expand(engine, inv, template)?);
                Ok(vec![ResolvedLocation::file(path)])
            }
            Location::Glob(template) => {
                let pattern = anchor(data_dir, &expand(engine, inv, template)?);
                let pattern = pattern.to_string_lossy().into_owned();
                let mut found = Vec::new();
                let matches = glob::glob(&pattern)
                    .map_err(|e| Error::config(format!("invalid glob '{}': {}", pattern, e)))?;
                for entry in matches {
                    let path =
                        entry.map_err(|e| Error::io(format!("glob '{}': {}", pattern, e)))?;
                    if path.is_file() {
                        found.push(ResolvedLocation::file(path));
                    }
                }
                Ok(found)
            }
            Location::Uri(template) => {
                let uri = expand(engine, inv, template)?;
                Ok(vec![ResolvedLocation {
                    resource: uri,
                    exists: true,
                }])
            }
            Location::MappedPath { key, var, template } => {
                let Some(mapped) = inv.scope().get(key).cloned() else {
                    return Ok(Vec::new());
                };
                let elements = match mapped {
                    Value::Sequence(seq) => seq,
                    single => vec![single],
                };
                let mut found = Vec::with_capacity(elements.len());
                for element in elements {
                    let mut bindings = IndexMap::new();
                    bindings.insert(var.clone(), element);
                    let expanded = inv.with_scope(bindings, |inv| {
                        expand(engine, inv, template)
                    })?;
                    found.push(ResolvedLocation::file(anchor(data_dir, &expanded)));
                }
                Ok(found)
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Path(s) | Location::Glob(s) | Location::Uri(s) => {
                write!(f, "{}({})", self.kind(), s)
            }
            Location::MappedPath { key, var, template } => {
                write!(f, "mapped_paths([{}, {}, {}])", key, var, template)
            }
        }
    }
}

/// A concrete resource a provider reads from
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    /// Path or URI
    pub resource: String,
    /// Whether the resource was present at resolution time. A missing
    /// location is not an error; providers report it and move on.
    pub exists: bool,
}

impl ResolvedLocation {
    fn file(path: PathBuf) -> Self {
        Self {
            exists: path.is_file(),
            resource: path.to_string_lossy().into_owned(),
        }
    }
}

fn expand<E: SubLookup>(engine: &E, inv: &mut Invocation, template: &str) -> Result<String> {
    Ok(interpolate_string(engine, inv, template)?.to_string())
}

fn anchor(data_dir: &Path, relative: &str) -> PathBuf {
    let path = Path::new(relative);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolate::testing::engine;
    use crate::invocation::Scope;
    use indexmap::IndexMap;
    use std::fs;

    fn scoped_inv(entries: &[(&str, Value)]) -> Invocation {
        let mut vars = IndexMap::new();
        for (k, v) in entries {
            vars.insert(k.to_string(), v.clone());
        }
        Invocation::new(Scope::from_vars(vars))
    }

    #[test]
    fn test_path_interpolates_scope() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("web01.yaml"), "a: 1\n").unwrap();

        let e = engine(&[]);
        let mut inv = scoped_inv(&[("node", Value::String("web01".into()))]);
        let loc = Location::Path("%{node}.yaml".into());
        let resolved = loc.resolve(&e, &mut inv, dir.path()).unwrap();

        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].exists);
        assert!(resolved[0].resource.ends_with("web01.yaml"));
    }

    #[test]
    fn test_missing_path_resolves_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(&[]);
        let mut inv = scoped_inv(&[]);
        let resolved = Location::Path("absent.yaml".into())
            .resolve(&e, &mut inv, dir.path())
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(!resolved[0].exists);
    }

    #[test]
    fn test_glob_expands_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "x: 1\n").unwrap();
        fs::write(dir.path().join("b.yaml"), "y: 2\n").unwrap();
        fs::write(dir.path().join("c.json"), "{}\n").unwrap();

        let e = engine(&[]);
        let mut inv = scoped_inv(&[]);
        let resolved = Location::Glob("*.yaml".into())
            .resolve(&e, &mut inv, dir.path())
            .unwrap();

        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|r| r.exists));
    }

    #[test]
    fn test_mapped_paths_bind_each_element() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("web.yaml"), "role: web\n").unwrap();

        let e = engine(&[]);
        let mut inv = scoped_inv(&[(
            "services",
            Value::from(vec!["web", "db"]),
        )]);
        let loc = Location::MappedPath {
            key: "services".into(),
            var: "service".into(),
            template: "%{service}.yaml".into(),
        };
        let resolved = loc.resolve(&e, &mut inv, dir.path()).unwrap();

        assert_eq!(resolved.len(), 2);
        assert!(resolved[0].resource.ends_with("web.yaml") && resolved[0].exists);
        assert!(resolved[1].resource.ends_with("db.yaml") && !resolved[1].exists);
    }

    #[test]
    fn test_mapped_paths_without_scope_value_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(&[]);
        let mut inv = scoped_inv(&[]);
        let loc = Location::MappedPath {
            key: "services".into(),
            var: "service".into(),
            template: "%{service}.yaml".into(),
        };
        assert!(loc.resolve(&e, &mut inv, dir.path()).unwrap().is_empty());
    }
}
