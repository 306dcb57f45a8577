//! The lookup engine
//!
//! A `Session` owns the resolved configuration and the function registry
//! for the lifetime of an embedding. Lookups run against a per-call
//! `Invocation`: the engine resolves the effective lookup options for the
//! key, walks the hierarchy under the active merge strategy, interpolates
//! hits, and applies type assertions and defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::{Config, ResolvedConfig, LOOKUP_OPTIONS};
use crate::error::{Error, Result};
use crate::interpolate::{interpolate_string, SubLookup};
use crate::invocation::Invocation;
use crate::key::Key;
use crate::merge::MergeStrategy;
use crate::provider::FunctionRegistry;
use crate::value::Value;
use crate::vtype::ValueType;

/// A transformation applied to a found value before type assertion
pub type Transform<'a> = &'a dyn Fn(Value) -> Result<Value>;

/// The lookup engine for one embedding session.
///
/// The session is immutable once built and can be shared across threads;
/// each concurrent lookup brings its own `Invocation`.
#[derive(Debug)]
pub struct Session {
    registry: Arc<FunctionRegistry>,
    config: Arc<ResolvedConfig>,
}

/// Builder for a `Session`
#[derive(Debug, Default)]
pub struct SessionBuilder {
    root: PathBuf,
    config_path: Option<PathBuf>,
    registry: Option<Arc<FunctionRegistry>>,
}

impl SessionBuilder {
    /// The engine root; locations and the config file resolve against it
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// An absolute configuration file overriding `<root>/strata.yaml`
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// An isolated function registry instead of the process-wide one
    pub fn registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    pub fn build(self) -> Result<Session> {
        let registry = self.registry.unwrap_or_else(FunctionRegistry::global);
        let config = Arc::new(Config::load(self.root, self.config_path.as_deref())?);
        let resolved = config.resolve(&registry)?;
        Ok(Session {
            registry,
            config: Arc::new(resolved),
        })
    }
}

/// Sources consulted around the hierarchy during `lookup_many`
struct LookupControl<'a> {
    call_options: &'a IndexMap<String, Value>,
    override_map: Option<&'a Value>,
    defaults_hash: Option<&'a Value>,
}

impl Session {
    /// Open a session rooted at `root` with the default configuration
    /// file name and the process-wide registry
    pub fn new(root: impl Into<PathBuf>) -> Result<Session> {
        SessionBuilder::default().root(root).build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// The resolved configuration shared by this session
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.config.config().root()
    }

    /// Look up a single key.
    ///
    /// Returns the merged, interpolated, type-checked value; the default
    /// when the hierarchy has no value; or a not-found error.
    pub fn lookup(
        &self,
        inv: &mut Invocation,
        name: &str,
        default: Option<Value>,
        options: &IndexMap<String, Value>,
    ) -> Result<Value> {
        self.lookup_many(
            inv,
            &[name.to_string()],
            None,
            default,
            None,
            None,
            options,
            None,
        )
    }

    /// Look up the first of `names` that yields a value.
    ///
    /// `override_map` is consulted before the hierarchy and `defaults_hash`
    /// after it, per name. `transform` is applied to a found value before
    /// the `value_type` assertion.
    #[allow(clippy::too_many_arguments)]
    pub fn lookup_many(
        &self,
        inv: &mut Invocation,
        names: &[String],
        value_type: Option<&ValueType>,
        default: Option<Value>,
        override_map: Option<&Value>,
        defaults_hash: Option<&Value>,
        options: &IndexMap<String, Value>,
        transform: Option<Transform<'_>>,
    ) -> Result<Value> {
        let ctl = LookupControl {
            call_options: options,
            override_map,
            defaults_hash,
        };

        for name in names {
            let key = match Key::parse(name) {
                Ok(key) => key,
                Err(e) => return inv.with_invalid_key(name, |_| Err(e)),
            };
            if let Some(found) = self.lookup_one(inv, &key, &ctl)? {
                let found = match transform {
                    Some(f) => f(found)?,
                    None => found,
                };
                if let Some(t) = value_type {
                    t.assert_value(&found)?;
                }
                return Ok(found);
            }
        }

        if let Some(default) = default {
            if let Some(t) = value_type {
                t.assert_value(&default)?;
            }
            return Ok(default);
        }
        Err(Error::not_found(names.join(", ")))
    }

    /// One full key resolution: options, override, hierarchy, defaults hash
    fn lookup_one(
        &self,
        inv: &mut Invocation,
        key: &Key,
        ctl: &LookupControl<'_>,
    ) -> Result<Option<Value>> {
        inv.with_lookup(key, |inv| {
            let opts = self.effective_options(inv, key, ctl.call_options)?;
            log::trace!(
                "looking up '{}' with merge strategy {}",
                key.original(),
                opts.strategy.name()
            );

            let run = |inv: &mut Invocation| -> Result<Option<Value>> {
                if let Some(overrides) = ctl.override_map {
                    if let Some(root) = overrides.dig(std::slice::from_ref(&root_segment(key))) {
                        if let Some(found) = key.dig(inv, root.clone())? {
                            return Ok(Some(found));
                        }
                    }
                }

                let mut found =
                    self.lookup_in_providers(inv, key, &opts.strategy, ctl.call_options, false)?;
                if found.is_none() {
                    found =
                        self.lookup_in_providers(inv, key, &opts.strategy, ctl.call_options, true)?;
                }
                if found.is_none() {
                    if let Some(defaults) = ctl.defaults_hash {
                        if let Some(root) = defaults.dig(std::slice::from_ref(&root_segment(key)))
                        {
                            found = key.dig(inv, root.clone())?;
                        }
                    }
                }
                Ok(found)
            };

            let found = if opts.sensitive {
                inv.do_redacted(run)?
            } else {
                run(inv)?
            };

            match found {
                Some(value) => {
                    let value = self.finalize(inv, value)?;
                    if let Some(t) = &opts.convert_to {
                        t.assert_value(&value)?;
                    }
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        })
    }

    /// Walk one hierarchy (regular or default) under the merge strategy,
    /// honoring the cancellation token between providers
    fn lookup_in_providers(
        &self,
        inv: &mut Invocation,
        key: &Key,
        strategy: &MergeStrategy,
        call_options: &IndexMap<String, Value>,
        defaults: bool,
    ) -> Result<Option<Value>> {
        let providers = if defaults {
            self.config.default_providers()
        } else {
            self.config.providers()
        };
        if providers.is_empty() {
            return Ok(None);
        }
        strategy.lookup(providers, inv, |provider, inv| {
            inv.check_cancelled()?;
            provider.lookup(self, &self.registry, inv, key, strategy, call_options)
        })
    }

    /// The merge strategy, asserted type, and redaction flag for one key
    fn effective_options(
        &self,
        inv: &mut Invocation,
        key: &Key,
        call_options: &IndexMap<String, Value>,
    ) -> Result<EffectiveOptions> {
        let per_key = self.lookup_options_for(inv, key)?;
        let per_key = per_key.as_ref().and_then(Value::as_mapping);

        let strategy = if let Some(v) = call_options.get("merge") {
            MergeStrategy::from_value(v)?
        } else if let Some(m) = inv.merge_override() {
            m.clone()
        } else if let Some(v) = per_key.and_then(|m| m.get("merge")) {
            MergeStrategy::from_value(v)?
        } else {
            MergeStrategy::First
        };

        let convert_to = match per_key.and_then(|m| m.get("convert_to")) {
            Some(Value::String(t)) => Some(ValueType::parse(t)?),
            Some(Value::Sequence(seq)) => match seq.first() {
                Some(Value::String(t)) => Some(ValueType::parse(t)?),
                _ => None,
            },
            _ => None,
        };

        let sensitive = per_key
            .and_then(|m| m.get("sensitive"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(EffectiveOptions {
            strategy,
            convert_to,
            sensitive,
        })
    }

    /// The `lookup_options` entry for this key, `None` in options mode:
    /// resolving the reserved key never consults it recursively
    fn lookup_options_for(&self, inv: &mut Invocation, key: &Key) -> Result<Option<Value>> {
        if inv.options_mode() || key.root() == LOOKUP_OPTIONS {
            return Ok(None);
        }
        let all = self.resolve_lookup_options(inv)?;
        Ok(all
            .as_ref()
            .and_then(Value::as_mapping)
            .and_then(|m| m.get(key.root()))
            .cloned())
    }

    /// Resolve the reserved key once per session, with a private fixed
    /// `hash` merge, in options mode
    fn resolve_lookup_options(&self, inv: &mut Invocation) -> Result<Option<Value>> {
        if let Some(cached) = self.config.lookup_options_cache().get() {
            return Ok(cached.clone());
        }
        let key = Key::parse(LOOKUP_OPTIONS).expect("reserved key parses");
        let computed = inv.for_lookup_options(|inv| {
            inv.with_lookup(&key, |inv| {
                self.lookup_in_providers(inv, &key, &MergeStrategy::Hash, &IndexMap::new(), false)
            })
        })?;
        let _ = self.config.lookup_options_cache().set(computed.clone());
        Ok(computed)
    }

    /// Resolve deferred expressions against the scope before the value
    /// leaves the engine
    fn finalize(&self, inv: &mut Invocation, value: Value) -> Result<Value> {
        Ok(match value {
            Value::Deferred(expr) => interpolate_string(self, inv, &expr)?,
            Value::Sequence(seq) => Value::Sequence(
                seq.into_iter()
                    .map(|v| self.finalize(inv, v))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Mapping(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, self.finalize(inv, v)?);
                }
                Value::Mapping(out)
            }
            Value::Typed(tag, inner) => Value::Typed(tag, Box::new(self.finalize(inv, *inner)?)),
            other => other,
        })
    }
}

struct EffectiveOptions {
    strategy: MergeStrategy,
    convert_to: Option<ValueType>,
    sensitive: bool,
}

fn root_segment(key: &Key) -> crate::key::Segment {
    crate::key::Segment::Name(key.root().to_string())
}

impl SubLookup for Session {
    /// Recursive lookup used by `%{lookup(...)}` and `%{alias(...)}`
    fn sub_lookup(&self, inv: &mut Invocation, name: &str) -> Result<Option<Value>> {
        let key = Key::parse(name)?;
        let empty = IndexMap::new();
        let ctl = LookupControl {
            call_options: &empty,
            override_map: None,
            defaults_hash: None,
        };
        self.lookup_one(inv, &key, &ctl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{CancelToken, Scope};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new(config: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("strata.yaml"), config).unwrap();
            fs::create_dir_all(dir.path().join("data")).unwrap();
            Self { dir }
        }

        fn data(&self, name: &str, body: &str) -> &Self {
            fs::write(self.dir.path().join("data").join(name), body).unwrap();
            self
        }

        fn session(&self) -> Session {
            Session::new(self.dir.path()).unwrap()
        }
    }

    fn two_layer() -> Fixture {
        Fixture::new(concat!(
            "version: 5\n",
            "defaults:\n",
            "  data_hash: yaml_data\n",
            "hierarchy:\n",
            "  - name: Nodes\n",
            "    path: nodes.yaml\n",
            "  - name: Common\n",
            "    path: common.yaml\n",
        ))
    }

    fn no_options() -> IndexMap<String, Value> {
        IndexMap::new()
    }

    #[test]
    fn test_lookup_simple_value() {
        let fx = two_layer();
        fx.data("common.yaml", "foo: bar\n");
        let session = fx.session();
        let mut inv = Invocation::new(Scope::new());

        let found = session.lookup(&mut inv, "foo", None, &no_options()).unwrap();
        assert_eq!(found, Value::String("bar".into()));
    }

    #[test]
    fn test_first_strategy_prefers_earlier_entry() {
        let fx = two_layer();
        fx.data("nodes.yaml", "who: nodes\n")
            .data("common.yaml", "who: common\n");
        let session = fx.session();
        let mut inv = Invocation::new(Scope::new());

        let found = session.lookup(&mut inv, "who", None, &no_options()).unwrap();
        assert_eq!(found, Value::String("nodes".into()));
    }

    #[test]
    fn test_not_found_and_default() {
        let fx = two_layer();
        fx.data("common.yaml", "foo: bar\n");
        let session = fx.session();

        let mut inv = Invocation::new(Scope::new());
        let err = session
            .lookup(&mut inv, "missing", None, &no_options())
            .unwrap_err();
        assert_eq!(err.kind_name(), "not-found");

        let mut inv = Invocation::new(Scope::new());
        let found = session
            .lookup(&mut inv, "missing", Some(Value::Int(9)), &no_options())
            .unwrap();
        assert_eq!(found, Value::Int(9));
    }

    #[test]
    fn test_lookup_many_tries_names_in_order() {
        let fx = two_layer();
        fx.data("common.yaml", "second: hit\n");
        let session = fx.session();
        let mut inv = Invocation::new(Scope::new());

        let found = session
            .lookup_many(
                &mut inv,
                &["first".into(), "second".into()],
                None,
                None,
                None,
                None,
                &no_options(),
                None,
            )
            .unwrap();
        assert_eq!(found, Value::String("hit".into()));
    }

    #[test]
    fn test_call_merge_option_beats_lookup_options() {
        let fx = two_layer();
        fx.data(
            "nodes.yaml",
            "lookup_options:\n  users:\n    merge: deep\nusers:\n  alice: {uid: 1}\n",
        )
        .data("common.yaml", "users:\n  bob: {uid: 2}\n");
        let session = fx.session();

        // lookup_options ask for deep: both users present
        let mut inv = Invocation::new(Scope::new());
        let deep = session.lookup(&mut inv, "users", None, &no_options()).unwrap();
        let map = deep.as_mapping().unwrap();
        assert!(map.contains_key("alice") && map.contains_key("bob"));

        // explicit first in the call wins over the configured deep
        let mut options = no_options();
        options.insert("merge".into(), Value::String("first".into()));
        let mut inv = Invocation::new(Scope::new());
        let first = session.lookup(&mut inv, "users", None, &options).unwrap();
        let map = first.as_mapping().unwrap();
        assert!(map.contains_key("alice") && !map.contains_key("bob"));
    }

    #[test]
    fn test_invocation_merge_override_applies() {
        let fx = two_layer();
        fx.data("nodes.yaml", "users:\n  alice: 1\n")
            .data("common.yaml", "users:\n  bob: 2\n");
        let session = fx.session();

        let mut inv = Invocation::new(Scope::new())
            .with_merge_override(Some(crate::merge::MergeStrategy::Hash));
        let found = session.lookup(&mut inv, "users", None, &no_options()).unwrap();
        let map = found.as_mapping().unwrap();
        assert!(map.contains_key("alice") && map.contains_key("bob"));
    }

    #[test]
    fn test_convert_to_type_mismatch() {
        let fx = two_layer();
        fx.data(
            "common.yaml",
            "lookup_options:\n  secret:\n    merge: first\n    convert_to: String\nsecret: 5\n",
        );
        let session = fx.session();

        // The default must NOT be substituted on a type mismatch
        let mut inv = Invocation::new(Scope::new());
        let err = session
            .lookup(
                &mut inv,
                "secret",
                Some(Value::String("fallback".into())),
                &no_options(),
            )
            .unwrap_err();
        assert_eq!(err.kind_name(), "type-mismatch");
    }

    #[test]
    fn test_lookup_options_key_resolves_without_itself() {
        let fx = two_layer();
        fx.data(
            "nodes.yaml",
            "lookup_options:\n  a:\n    merge: deep\n",
        )
        .data(
            "common.yaml",
            "lookup_options:\n  b:\n    merge: unique\n",
        );
        let session = fx.session();
        let mut inv = Invocation::new(Scope::new());

        // Direct lookup of the reserved key: hash-merged across the
        // hierarchy, not influenced by any lookup_options entry
        let found = session
            .lookup(&mut inv, "lookup_options", None, &no_options())
            .unwrap();
        let map = found.as_mapping().unwrap();
        assert!(map.contains_key("a") && map.contains_key("b"));
    }

    #[test]
    fn test_override_consulted_before_hierarchy() {
        let fx = two_layer();
        fx.data("common.yaml", "color: from-files\n");
        let session = fx.session();
        let mut inv = Invocation::new(Scope::new());

        let mut overrides = IndexMap::new();
        overrides.insert("color".to_string(), Value::String("from-override".into()));
        let found = session
            .lookup_many(
                &mut inv,
                &["color".into()],
                None,
                None,
                Some(&Value::Mapping(overrides)),
                None,
                &no_options(),
                None,
            )
            .unwrap();
        assert_eq!(found, Value::String("from-override".into()));
    }

    #[test]
    fn test_defaults_hash_consulted_after_hierarchy() {
        let fx = two_layer();
        fx.data("common.yaml", "present: yes\n");
        let session = fx.session();
        let mut inv = Invocation::new(Scope::new());

        let mut defaults = IndexMap::new();
        defaults.insert("absent".to_string(), Value::Int(3));
        let found = session
            .lookup_many(
                &mut inv,
                &["absent".into()],
                None,
                None,
                None,
                Some(&Value::Mapping(defaults)),
                &no_options(),
                None,
            )
            .unwrap();
        assert_eq!(found, Value::Int(3));
    }

    #[test]
    fn test_default_hierarchy_consulted_on_miss() {
        let fx = Fixture::new(concat!(
            "version: 5\n",
            "defaults:\n",
            "  data_hash: yaml_data\n",
            "hierarchy:\n",
            "  - name: Common\n",
            "    path: common.yaml\n",
            "default_hierarchy:\n",
            "  - name: Fallback\n",
            "    path: fallback.yaml\n",
        ));
        fx.data("common.yaml", "a: main\n")
            .data("fallback.yaml", "a: fb\nb: fb-only\n");
        let session = fx.session();

        let mut inv = Invocation::new(Scope::new());
        let a = session.lookup(&mut inv, "a", None, &no_options()).unwrap();
        assert_eq!(a, Value::String("main".into()));

        let mut inv = Invocation::new(Scope::new());
        let b = session.lookup(&mut inv, "b", None, &no_options()).unwrap();
        assert_eq!(b, Value::String("fb-only".into()));
    }

    #[test]
    fn test_transform_applied_before_type_assertion() {
        let fx = two_layer();
        fx.data("common.yaml", "num: 41\n");
        let session = fx.session();
        let mut inv = Invocation::new(Scope::new());

        let bump: Transform<'_> = &|v: Value| match v {
            Value::Int(i) => Ok(Value::Int(i + 1)),
            other => Ok(other),
        };
        let found = session
            .lookup_many(
                &mut inv,
                &["num".into()],
                Some(&ValueType::Integer),
                None,
                None,
                None,
                &no_options(),
                Some(bump),
            )
            .unwrap();
        assert_eq!(found, Value::Int(42));
    }

    #[test]
    fn test_recursive_interpolation_detected() {
        let fx = two_layer();
        fx.data(
            "common.yaml",
            "a: \"%{lookup('b')}\"\nb: \"%{lookup('a')}\"\n",
        );
        let session = fx.session();
        let mut inv = Invocation::new(Scope::new());

        let err = session.lookup(&mut inv, "a", None, &no_options()).unwrap_err();
        assert!(
            err.kind_name() == "endless-recursion" || err.kind_name() == "interpolation-loop",
            "got {}",
            err.kind_name()
        );
    }

    #[test]
    fn test_invalid_key_fails_loud() {
        let fx = two_layer();
        fx.data("common.yaml", "a: 1\n");
        let session = fx.session();
        let mut inv = Invocation::new(Scope::new());

        let err = session.lookup(&mut inv, "a..b", None, &no_options()).unwrap_err();
        assert_eq!(err.kind_name(), "empty-key-segment");
    }

    #[test]
    fn test_cancellation_between_providers() {
        let fx = two_layer();
        fx.data("common.yaml", "a: 1\n");
        let session = fx.session();

        let token = CancelToken::new();
        token.cancel();
        let mut inv = Invocation::new(Scope::new()).with_cancel_token(token);
        let err = session.lookup(&mut inv, "a", None, &no_options()).unwrap_err();
        assert_eq!(err.kind_name(), "cancelled");
    }

    #[test]
    fn test_deferred_resolves_against_scope_on_exit() {
        let fx = two_layer();
        fx.data("common.yaml", "a: 1\n");
        let session = fx.session();

        let mut scope = Scope::new();
        scope.set("env", Value::String("prod".into()));
        let mut inv = Invocation::new(scope);

        let mut defaults = IndexMap::new();
        defaults.insert("tier".to_string(), Value::Deferred("%{env}".into()));
        let found = session
            .lookup_many(
                &mut inv,
                &["tier".into()],
                None,
                None,
                None,
                Some(&Value::Mapping(defaults)),
                &no_options(),
                None,
            )
            .unwrap();
        assert_eq!(found, Value::String("prod".into()));
    }

    #[test]
    fn test_session_shared_across_threads() {
        let fx = two_layer();
        fx.data("common.yaml", "foo: bar\n");
        let session = std::sync::Arc::new(fx.session());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                std::thread::spawn(move || {
                    let mut inv = Invocation::new(Scope::new());
                    session
                        .lookup(&mut inv, "foo", None, &IndexMap::new())
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Value::String("bar".into()));
        }
    }
}
