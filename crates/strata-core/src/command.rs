//! Command support
//!
//! The pieces shared by the CLI and the REST frontend: assembling the
//! lookup scope from `key:value` variables and variable files, parsing
//! command options, performing the lookup, and rendering the result.

use std::io::Write;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::error::{Error, ErrorKind, Result};
use crate::explain::{ExplainMode, Explainer};
use crate::invocation::{CancelToken, Invocation, Scope};
use crate::lookup::Session;
use crate::value::Value;
use crate::vtype::ValueType;

/// Options given to the CLI lookup command or a REST invocation
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Declared type for the found value, e.g. "String" or "Array[Integer]"
    pub value_type: Option<String>,
    /// Merge strategy name
    pub merge: Option<String>,
    /// String representation of the default value
    pub default: Option<String>,
    /// Paths to files with extra variables for the scope; `-` reads stdin
    pub var_paths: Vec<String>,
    /// Extra variables as `key:value` or `key=value`
    pub variables: Vec<String>,
    /// Desired rendering of the result
    pub render_as: Option<RenderAs>,
    /// Explain the progress of the lookup
    pub explain: bool,
    /// Explain how lookup options were found
    pub explain_options: bool,
}

/// Output renderings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderAs {
    Yaml,
    Json,
    /// Bare stringification
    S,
    /// Raw bytes of a binary value
    Binary,
}

impl RenderAs {
    pub fn from_name(name: &str) -> Result<RenderAs> {
        match name {
            "yaml" => Ok(RenderAs::Yaml),
            "json" => Ok(RenderAs::Json),
            "s" => Ok(RenderAs::S),
            "binary" => Ok(RenderAs::Binary),
            _ => Err(Error::parse(format!("unknown rendering '{}'", name))),
        }
    }
}

// Splits on the first ':' or '=' but not on '::', ':=', '=:' or '=='
fn var_split() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\A(.*?[^:=])[:=]([^:=].*)\z").unwrap())
}

/// Parse one `key:value` / `key=value` variable
pub fn parse_variable(expr: &str) -> Result<(String, Value)> {
    let Some(captures) = var_split().captures(expr) else {
        return Err(Error::parse(format!("unable to parse variable '{}'", expr)));
    };
    let key = captures[1].trim().to_string();
    Ok((key, parse_variable_value(&captures[2])))
}

/// Values starting with `{`, `[`, `"` or `'` are structured expressions;
/// anything else is a plain string
fn parse_variable_value(text: &str) -> Value {
    let text = text.trim();
    if text.starts_with(['{', '[', '"', '\'']) {
        if let Ok(value) = Value::parse_yaml(text) {
            return value;
        }
    }
    Value::String(text.to_string())
}

/// Build the lookup scope from variable files and variables.
/// Files merge left-to-right, explicit variables override them.
pub fn build_scope(options: &CommandOptions) -> Result<Scope> {
    let mut scope = Scope::new();

    for path in &options.var_paths {
        let text = if path == "-" {
            std::io::read_to_string(std::io::stdin())
                .map_err(|e| Error::io(format!("failed to read stdin: {}", e)))?
        } else {
            std::fs::read_to_string(path)
                .map_err(|e| Error::io(format!("failed to read '{}': {}", path, e)))?
        };
        if text.trim().is_empty() {
            continue;
        }
        let value = Value::parse_yaml(&text).map_err(|e| e.with_context("path", path.clone()))?;
        let Value::Mapping(map) = value else {
            return Err(Error::new(ErrorKind::YamlNotHash { path: path.clone() }));
        };
        scope.merge_vars(map);
    }

    let mut vars = IndexMap::new();
    for expr in &options.variables {
        let (key, value) = parse_variable(expr)?;
        vars.insert(key, value);
    }
    scope.merge_vars(vars);

    Ok(scope)
}

/// Perform a lookup with the given options and render the result.
///
/// Returns `Ok(true)` when a value was found and rendered, `Ok(false)`
/// when nothing was found and no default exists. Other failures are
/// errors.
pub fn lookup_and_render(
    session: &Session,
    options: &CommandOptions,
    names: &[String],
    cancel: Option<CancelToken>,
    out: &mut impl Write,
) -> Result<bool> {
    let value_type = options
        .value_type
        .as_deref()
        .map(ValueType::parse)
        .transpose()?;

    let default = options
        .default
        .as_ref()
        .map(|text| -> Result<Value> {
            let parsed = parse_variable_value(text);
            match &value_type {
                Some(t) => t.coerce(parsed),
                None => Ok(parsed),
            }
        })
        .transpose()?;

    let mut call_options = IndexMap::new();
    match options.merge.as_deref() {
        None | Some("") | Some("first") => {}
        Some(merge) => {
            call_options.insert("merge".to_string(), Value::String(merge.to_string()));
        }
    }

    let scope = build_scope(options)?;
    let mut inv = Invocation::new(scope);
    if options.explain || options.explain_options {
        let mode = match (options.explain, options.explain_options) {
            (true, true) => ExplainMode::Both,
            (false, true) => ExplainMode::Options,
            _ => ExplainMode::Data,
        };
        inv = inv.with_explainer(Explainer::new(mode));
    }
    if let Some(token) = cancel {
        inv = inv.with_cancel_token(token);
    }

    let looked_up = session.lookup_many(
        &mut inv,
        names,
        value_type.as_ref(),
        default,
        None,
        None,
        &call_options,
        None,
    );

    let found = match looked_up {
        Ok(value) => Some(value),
        Err(e) if matches!(e.kind, ErrorKind::NotFound { .. }) => None,
        Err(e) => return Err(e),
    };

    if let Some(explainer) = inv.take_explainer() {
        render_explanation(explainer, options.render_as, out)?;
        return Ok(found.is_some());
    }

    match found {
        Some(value) => {
            render(&value, options.render_as.unwrap_or(RenderAs::Yaml), out)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Render a value in the requested format
pub fn render(value: &Value, render_as: RenderAs, out: &mut impl Write) -> Result<()> {
    match render_as {
        RenderAs::Yaml => {
            let text = serde_yaml::to_string(value).map_err(|e| Error::io(e.to_string()))?;
            out.write_all(text.as_bytes())
        }
        RenderAs::Json => {
            let text = serde_json::to_string(value).map_err(|e| Error::io(e.to_string()))?;
            writeln!(out, "{}", text)
        }
        RenderAs::S => writeln!(out, "{}", value),
        RenderAs::Binary => match value {
            Value::Binary(bytes) => out.write_all(bytes),
            Value::String(s) => out.write_all(s.as_bytes()),
            other => {
                return Err(Error::type_mismatch("Binary", other.type_name()));
            }
        },
    }
    .map_err(|e| Error::io(e.to_string()))
}

fn render_explanation(
    explainer: Explainer,
    render_as: Option<RenderAs>,
    out: &mut impl Write,
) -> Result<()> {
    match render_as {
        Some(RenderAs::Json) => {
            let text = serde_json::to_string_pretty(&explainer.finish())
                .map_err(|e| Error::io(e.to_string()))?;
            writeln!(out, "{}", text)
        }
        Some(RenderAs::Yaml) => {
            let text = serde_yaml::to_string(&explainer.finish())
                .map_err(|e| Error::io(e.to_string()))?;
            out.write_all(text.as_bytes())
        }
        _ => out.write_all(explainer.render_text().as_bytes()),
    }
    .map_err(|e| Error::io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_variable_colon_and_equals() {
        assert_eq!(
            parse_variable("env:prod").unwrap(),
            ("env".to_string(), Value::String("prod".into()))
        );
        assert_eq!(
            parse_variable("env=prod").unwrap(),
            ("env".to_string(), Value::String("prod".into()))
        );
    }

    #[test]
    fn test_parse_variable_literal_separator_runs() {
        // '::' is literal, the later '=' separates
        let (key, value) = parse_variable("ns::mod=x").unwrap();
        assert_eq!(key, "ns::mod");
        assert_eq!(value, Value::String("x".into()));

        assert!(parse_variable("justtext").is_err());
    }

    #[test]
    fn test_parse_variable_structured_values() {
        let (_, value) = parse_variable("list:[1, 2]").unwrap();
        assert_eq!(value, Value::from(vec![Value::Int(1), Value::Int(2)]));

        let (_, value) = parse_variable("map:{a: 1}").unwrap();
        assert!(value.is_mapping());

        let (_, value) = parse_variable("quoted:\"has space\"").unwrap();
        assert_eq!(value, Value::String("has space".into()));

        let (_, value) = parse_variable("plain:1").unwrap();
        assert_eq!(value, Value::String("1".into()));
    }

    #[test]
    fn test_build_scope_merges_files_then_vars() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.yaml");
        let second = dir.path().join("second.yaml");
        fs::write(&first, "a: 1\nb: file\n").unwrap();
        fs::write(&second, "b: second\n").unwrap();

        let options = CommandOptions {
            var_paths: vec![
                first.to_string_lossy().into_owned(),
                second.to_string_lossy().into_owned(),
            ],
            variables: vec!["c:var".to_string()],
            ..Default::default()
        };
        let scope = build_scope(&options).unwrap();

        assert_eq!(scope.get("a"), Some(&Value::Int(1)));
        assert_eq!(scope.get("b"), Some(&Value::String("second".into())));
        assert_eq!(scope.get("c"), Some(&Value::String("var".into())));
    }

    #[test]
    fn test_build_scope_rejects_non_mapping_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.yaml");
        fs::write(&path, "- 1\n- 2\n").unwrap();

        let options = CommandOptions {
            var_paths: vec![path.to_string_lossy().into_owned()],
            ..Default::default()
        };
        let err = build_scope(&options).unwrap_err();
        assert_eq!(err.kind_name(), "yaml-not-hash");
    }

    #[test]
    fn test_render_formats() {
        let value = Value::from(vec![Value::Int(1), Value::Int(2)]);

        let mut yaml = Vec::new();
        render(&value, RenderAs::Yaml, &mut yaml).unwrap();
        assert_eq!(String::from_utf8(yaml).unwrap(), "- 1\n- 2\n");

        let mut json = Vec::new();
        render(&value, RenderAs::Json, &mut json).unwrap();
        assert_eq!(String::from_utf8(json).unwrap(), "[1,2]\n");

        let mut s = Vec::new();
        render(&value, RenderAs::S, &mut s).unwrap();
        assert_eq!(String::from_utf8(s).unwrap(), "[1, 2]\n");
    }

    #[test]
    fn test_render_binary() {
        let mut out = Vec::new();
        render(&Value::Binary(vec![1, 2, 255]), RenderAs::Binary, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 255]);

        let mut out = Vec::new();
        let err = render(&Value::Int(1), RenderAs::Binary, &mut out).unwrap_err();
        assert_eq!(err.kind_name(), "type-mismatch");
    }

    #[test]
    fn test_render_as_names() {
        assert_eq!(RenderAs::from_name("yaml").unwrap(), RenderAs::Yaml);
        assert_eq!(RenderAs::from_name("s").unwrap(), RenderAs::S);
        assert!(RenderAs::from_name("xml").is_err());
    }
}
