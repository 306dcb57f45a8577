//! Per-lookup invocation state
//!
//! An `Invocation` is created when a top-level lookup begins and discarded
//! when it returns. It carries the caller's scope, the recursion guards,
//! the optional explainer, and the cooperative cancellation token. Guarded
//! scopes are entered through closure-taking methods so that every exit
//! path releases what it acquired.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, ErrorKind, Result};
use crate::explain::{Event, Explainer};
use crate::key::{Key, Segment};
use crate::merge::MergeStrategy;
use crate::value::Value;

/// A caller-supplied token checked between provider invocations
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every lookup holding this token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The read-only variable scope supplied by the caller.
///
/// Temporary bindings (mapped path variables) layer on top of the base
/// variables and disappear when their scope exits.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: IndexMap<String, Value>,
    overlays: Vec<IndexMap<String, Value>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vars(vars: IndexMap<String, Value>) -> Self {
        Self {
            vars,
            overlays: Vec::new(),
        }
    }

    /// Merge a mapping into the base variables, later entries winning
    pub fn merge_vars(&mut self, vars: IndexMap<String, Value>) {
        for (k, v) in vars {
            self.vars.insert(k, v);
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.overlays.is_empty()
    }

    /// Look up a possibly dotted name. An unparseable name is a miss.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let key = Key::parse(name).ok()?;
        let root = self.get_root(key.root())?;
        root.dig(key.tail())
    }

    fn get_root(&self, root: &str) -> Option<&Value> {
        for overlay in self.overlays.iter().rev() {
            if let Some(v) = overlay.get(root) {
                return Some(v);
            }
        }
        self.vars.get(root)
    }
}

/// Which lookup the explainer is currently recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Data,
    Options,
    Config,
}

/// Per-call engine context
#[derive(Debug)]
pub struct Invocation {
    scope: Scope,
    explainer: Option<Explainer>,
    branch: Branch,
    options_mode: bool,
    lookup_stack: Vec<String>,
    sublookup_stack: Vec<String>,
    interpolation_stack: Vec<String>,
    redacted: bool,
    merge_override: Option<MergeStrategy>,
    cancel: Option<CancelToken>,
}

impl Invocation {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            explainer: None,
            branch: Branch::Data,
            options_mode: false,
            lookup_stack: Vec::new(),
            sublookup_stack: Vec::new(),
            interpolation_stack: Vec::new(),
            redacted: false,
            merge_override: None,
            cancel: None,
        }
    }

    pub fn with_explainer(mut self, explainer: Explainer) -> Self {
        self.explainer = Some(explainer);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_merge_override(mut self, strategy: Option<MergeStrategy>) -> Self {
        self.merge_override = strategy;
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn merge_override(&self) -> Option<&MergeStrategy> {
        self.merge_override.as_ref()
    }

    /// True while resolving the reserved `lookup_options` key
    pub fn options_mode(&self) -> bool {
        self.options_mode
    }

    pub fn take_explainer(&mut self) -> Option<Explainer> {
        self.explainer.take()
    }

    /// Fails when the caller requested cancellation
    pub fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(Error::new(ErrorKind::Cancelled)),
            _ => Ok(()),
        }
    }

    fn explaining(&self) -> bool {
        match (&self.explainer, self.branch) {
            (Some(e), Branch::Data) => e.records_data(),
            (Some(e), Branch::Options) => e.records_options(),
            _ => false,
        }
    }

    fn with_frame<T>(
        &mut self,
        event: Event,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if !self.explaining() {
            return f(self);
        }
        self.explainer.as_mut().unwrap().push(event);
        let result = f(self);
        if let Some(explainer) = self.explainer.as_mut() {
            explainer.pop();
        }
        result
    }

    fn leaf(&mut self, event: Event) {
        if self.explaining() {
            self.explainer.as_mut().unwrap().leaf(event);
        }
    }

    /// Guard a top-level lookup of `key` against endless recursion
    pub fn with_lookup<T>(
        &mut self,
        key: &Key,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let name = key.original().to_string();
        if self.lookup_stack.contains(&name) {
            return Err(Error::endless_recursion(&name));
        }
        self.lookup_stack.push(name);
        let result = self.with_frame(
            Event::Lookup {
                key: key.original().to_string(),
            },
            f,
        );
        self.lookup_stack.pop();
        result
    }

    /// Guard segment navigation below a found root value
    pub fn with_sublookup<T>(
        &mut self,
        key: &Key,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let name = key.original().to_string();
        if self.sublookup_stack.contains(&name) {
            return Err(Error::endless_recursion(&name));
        }
        self.sublookup_stack.push(name);
        let result = self.with_frame(
            Event::SubLookup {
                key: key.original().to_string(),
            },
            f,
        );
        self.sublookup_stack.pop();
        result
    }

    /// Guard one interpolation expression against loops
    pub fn with_interpolation<T>(
        &mut self,
        expr: &str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.interpolation_stack.iter().any(|e| e == expr) {
            return Err(Error::interpolation_loop(expr));
        }
        self.interpolation_stack.push(expr.to_string());
        let result = self.with_frame(
            Event::Interpolation {
                expression: expr.to_string(),
            },
            f,
        );
        self.interpolation_stack.pop();
        result
    }

    pub fn with_merge<T>(
        &mut self,
        strategy: &MergeStrategy,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.with_frame(
            Event::Merge {
                strategy: strategy.name().to_string(),
            },
            f,
        )
    }

    pub fn with_data_provider<T>(
        &mut self,
        provider: &str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.with_frame(
            Event::DataProvider {
                provider: provider.to_string(),
            },
            f,
        )
    }

    pub fn with_location<T>(
        &mut self,
        location: &str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.with_frame(
            Event::Location {
                location: location.to_string(),
            },
            f,
        )
    }

    pub fn with_segment<T>(
        &mut self,
        segment: &Segment,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.with_frame(
            Event::Segment {
                segment: segment.to_string(),
            },
            f,
        )
    }

    pub fn with_invalid_key<T>(
        &mut self,
        key: &str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.with_frame(
            Event::InvalidKey {
                key: key.to_string(),
            },
            f,
        )
    }

    /// Run `f` with extra scope bindings layered on top
    pub fn with_scope<T>(
        &mut self,
        bindings: IndexMap<String, Value>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.scope.overlays.push(bindings);
        let result = f(self);
        self.scope.overlays.pop();
        result
    }

    /// Run `f` without revealing found values in the explanation
    pub fn do_redacted<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let previous = self.redacted;
        self.redacted = true;
        let result = f(self);
        self.redacted = previous;
        result
    }

    /// Run `f` in lookup-options mode: the reserved key resolution neither
    /// consults lookup options itself nor shows up in a data explanation
    pub fn for_lookup_options<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let (branch, options_mode) = (self.branch, self.options_mode);
        self.branch = Branch::Options;
        self.options_mode = true;
        let result = f(self);
        self.branch = branch;
        self.options_mode = options_mode;
        result
    }

    /// Run `f` back in data mode (inside an options-mode resolution)
    pub fn for_data<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let (branch, options_mode) = (self.branch, self.options_mode);
        self.branch = Branch::Data;
        self.options_mode = false;
        let result = f(self);
        self.branch = branch;
        self.options_mode = options_mode;
        result
    }

    /// Run `f` without any explanation, used while resolving the config
    pub fn for_config<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let branch = self.branch;
        self.branch = Branch::Config;
        let result = f(self);
        self.branch = branch;
        result
    }

    pub fn report_found(&mut self, key: &str, value: &Value) {
        let value = if self.redacted {
            None
        } else {
            Some(value.clone())
        };
        self.leaf(Event::Found {
            key: key.to_string(),
            value,
        });
    }

    pub fn report_not_found(&mut self, key: &str) {
        self.leaf(Event::NotFound {
            key: key.to_string(),
        });
    }

    pub fn report_location_not_found(&mut self) {
        self.leaf(Event::LocationNotFound);
    }

    pub fn report_merge_result(&mut self, value: &Value) {
        let value = if self.redacted {
            None
        } else {
            Some(value.clone())
        };
        self.leaf(Event::MergeResult { value });
    }

    pub fn report_text(&mut self, message: impl Into<String>) {
        self.leaf(Event::Text {
            message: message.into(),
        });
    }
}
