//! String interpolation
//!
//! Expands `%{...}` expressions inside string values. An expression is
//! either a method call (`scope`, `lookup`, `alias`, `literal`) or a bare
//! name, which is shorthand for `scope`. A single-quoted argument disables
//! interpolation of the resolved value; double-quoted and bare arguments
//! enable it. `alias` returns the raw value and is only legal when the
//! expression is the entire source string.

use crate::error::{Error, Result};
use crate::invocation::Invocation;
use crate::value::Value;

/// The recursive lookup seam used by the `lookup` and `alias` methods.
/// The engine implements this; tests substitute a fixture.
pub(crate) trait SubLookup {
    /// Full engine lookup of `name`, `None` when nothing was found
    fn sub_lookup(&self, inv: &mut Invocation, name: &str) -> Result<Option<Value>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Scope,
    Lookup,
    Alias,
    Literal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Single,
    Double,
    Bare,
}

#[derive(Debug, Clone, PartialEq)]
struct Expression {
    /// The inner text, used for loop detection and error reporting
    text: String,
    method: Method,
    arg: String,
    quote: Quote,
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Expression(Expression),
}

/// Interpolate every string leaf of a value. `Deferred` values pass
/// through untouched; they resolve when the value leaves the engine.
pub(crate) fn interpolate_value<E: SubLookup>(
    engine: &E,
    inv: &mut Invocation,
    value: &Value,
) -> Result<Value> {
    if !value.needs_interpolation() {
        return Ok(value.clone());
    }
    Ok(match value {
        Value::String(s) => interpolate_string(engine, inv, s)?,
        Value::Sequence(seq) => Value::Sequence(
            seq.iter()
                .map(|v| interpolate_value(engine, inv, v))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Mapping(map) => {
            let mut out = indexmap::IndexMap::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), interpolate_value(engine, inv, v)?);
            }
            Value::Mapping(out)
        }
        Value::Typed(tag, inner) => Value::Typed(
            tag.clone(),
            Box::new(interpolate_value(engine, inv, inner)?),
        ),
        other => other.clone(),
    })
}

/// Interpolate a single string, returning the expanded value
pub(crate) fn interpolate_string<E: SubLookup>(
    engine: &E,
    inv: &mut Invocation,
    source: &str,
) -> Result<Value> {
    if !source.contains("%{") {
        return Ok(Value::String(source.to_string()));
    }

    let parts = scan(source)?;

    // alias is only legal when it is the whole string
    let alias_count = parts
        .iter()
        .filter(|p| matches!(p, Part::Expression(e) if e.method == Method::Alias))
        .count();
    if alias_count > 0 {
        if parts.len() != 1 {
            return Err(Error::alias_not_alone(source));
        }
        let Part::Expression(expr) = &parts[0] else {
            unreachable!()
        };
        return match evaluate(engine, inv, expr)? {
            Some(value) => Ok(value),
            None => Ok(Value::Null),
        };
    }

    let mut out = String::new();
    for part in &parts {
        match part {
            Part::Literal(text) => out.push_str(text),
            Part::Expression(expr) => {
                if let Some(value) = evaluate(engine, inv, expr)? {
                    match value {
                        Value::Null => {}
                        other => out.push_str(&other.to_string()),
                    }
                }
            }
        }
    }
    Ok(Value::String(out))
}

/// Evaluate one expression to its value, `None` on a scope/lookup miss
fn evaluate<E: SubLookup>(
    engine: &E,
    inv: &mut Invocation,
    expr: &Expression,
) -> Result<Option<Value>> {
    if expr.method == Method::Literal {
        return Ok(Some(Value::String(expr.arg.clone())));
    }
    if expr.arg.is_empty() {
        return Ok(None);
    }

    inv.with_interpolation(&expr.text, |inv| {
        let resolved = match expr.method {
            Method::Scope => {
                let found = inv.scope().get(&expr.arg).cloned();
                match &found {
                    Some(v) => inv.report_found(&expr.arg, v),
                    None => inv.report_not_found(&expr.arg),
                }
                found
            }
            Method::Lookup | Method::Alias => engine.sub_lookup(inv, &expr.arg)?,
            Method::Literal => unreachable!(),
        };

        // A double-quoted or bare argument interpolates the result again
        match resolved {
            Some(value) if expr.quote != Quote::Single => {
                Ok(Some(interpolate_value(engine, inv, &value)?))
            }
            other => Ok(other),
        }
    })
}

/// Split a source string into literal runs and `%{...}` expressions
fn scan(source: &str) -> Result<Vec<Part>> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = source.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c == '%' && matches!(chars.peek(), Some((_, '{'))) {
            chars.next();
            if !literal.is_empty() {
                parts.push(Part::Literal(std::mem::take(&mut literal)));
            }
            let mut inner = String::new();
            let mut quote: Option<char> = None;
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                match quote {
                    Some(q) => {
                        if c == q {
                            quote = None;
                        }
                        inner.push(c);
                    }
                    None => match c {
                        '\'' | '"' => {
                            quote = Some(c);
                            inner.push(c);
                        }
                        '}' => {
                            closed = true;
                            break;
                        }
                        _ => inner.push(c),
                    },
                }
            }
            if !closed {
                return Err(Error::parse(format!(
                    "unterminated interpolation in '{}'",
                    source
                )));
            }
            let inner = inner.trim();
            if !inner.is_empty() {
                parts.push(Part::Expression(parse_expression(inner)?));
            }
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    Ok(parts)
}

/// Parse the text between `%{` and `}`
fn parse_expression(text: &str) -> Result<Expression> {
    let (method, arg_text) = match text.find('(') {
        Some(open) if text.ends_with(')') => {
            let name = text[..open].trim();
            let method = match name {
                "scope" => Method::Scope,
                "lookup" => Method::Lookup,
                "alias" => Method::Alias,
                "literal" => Method::Literal,
                _ => return Err(Error::unknown_interpolation_method(name)),
            };
            (method, text[open + 1..text.len() - 1].trim())
        }
        // Bare form: shorthand for scope
        _ => (Method::Scope, text),
    };

    let (arg, quote) = match arg_text.chars().next() {
        Some(q @ ('\'' | '"')) => {
            let rest = &arg_text[1..];
            let Some(stripped) = rest.strip_suffix(q) else {
                return Err(Error::parse(format!(
                    "unterminated quote in interpolation '{}'",
                    text
                )));
            };
            (
                stripped.to_string(),
                if q == '\'' { Quote::Single } else { Quote::Double },
            )
        }
        _ => (arg_text.to_string(), Quote::Bare),
    };

    Ok(Expression {
        text: text.to_string(),
        method,
        arg,
        quote,
    })
}
