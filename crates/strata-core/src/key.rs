//! Lookup key parsing
//!
//! A key is a root name followed by dot-separated segments. Segments may be
//! single- or double-quoted; inside quotes a `.` is literal and the matching
//! quote ends the quoted run. An unquoted numeric segment is a sequence
//! index. The first segment must be a plain name.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, ErrorKind, Result};
use crate::invocation::Invocation;
use crate::value::Value;

/// A step in a key past the root: a map key or a sequence index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A key in a mapping
    Name(String),
    /// An index in a sequence
    Index(i64),
}

impl Segment {
    /// The segment as a mapping key (indices stringified)
    pub fn as_map_key(&self) -> String {
        match self {
            Segment::Name(s) => s.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Name(s) => write!(f, "{}", s),
            Segment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Parsed representation of a dotted lookup name
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    original: String,
    parts: Vec<Segment>,
}

impl Key {
    /// Parse a key string
    pub fn parse(s: &str) -> Result<Key> {
        let mut parts = Vec::new();
        let mut buf = String::new();
        let mut quote: Option<char> = None;
        let mut quoted = false;

        for c in s.chars() {
            match quote {
                Some(q) => {
                    if c == q {
                        quote = None;
                    } else {
                        buf.push(c);
                    }
                }
                None => match c {
                    '\'' | '"' => {
                        quote = Some(c);
                        quoted = true;
                    }
                    '.' => {
                        push_segment(s, &mut parts, &mut buf, quoted)?;
                        quoted = false;
                    }
                    _ => buf.push(c),
                },
            }
        }

        if quote.is_some() {
            return Err(Error::new(ErrorKind::UnterminatedQuote { key: s.into() }));
        }
        push_segment(s, &mut parts, &mut buf, quoted)?;

        Ok(Key {
            original: s.to_string(),
            parts,
        })
    }

    /// The original key string
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The root segment name
    pub fn root(&self) -> &str {
        match &self.parts[0] {
            Segment::Name(s) => s,
            // parse() rejects an integer first segment
            Segment::Index(_) => unreachable!(),
        }
    }

    /// All segments including the root
    pub fn parts(&self) -> &[Segment] {
        &self.parts
    }

    /// The segments past the root
    pub fn tail(&self) -> &[Segment] {
        &self.parts[1..]
    }

    /// Navigate a value along the tail segments, reporting each step.
    ///
    /// Returns `None` when any segment is absent. Nested navigation is a
    /// sub-lookup and participates in the recursion guard.
    pub fn dig(&self, inv: &mut Invocation, value: Value) -> Result<Option<Value>> {
        if self.parts.len() == 1 {
            return Ok(Some(value));
        }
        inv.with_sublookup(self, |inv| {
            let mut current = value;
            for seg in self.tail() {
                let found = current.dig(std::slice::from_ref(seg)).cloned();
                inv.with_segment(seg, |inv| {
                    match &found {
                        Some(v) => inv.report_found(&seg.to_string(), v),
                        None => inv.report_not_found(&seg.to_string()),
                    }
                    Ok(())
                })?;
                match found {
                    Some(v) => current = v,
                    None => return Ok(None),
                }
            }
            Ok(Some(current))
        })
    }

    /// Wrap a value in one single-entry mapping per tail segment, innermost
    /// last. Used when a provider stores whole roots but the caller asked
    /// for a nested key.
    pub fn bury(&self, value: Value) -> Value {
        let mut wrapped = value;
        for seg in self.tail().iter().rev() {
            let mut map = IndexMap::new();
            map.insert(seg.as_map_key(), wrapped);
            wrapped = Value::Mapping(map);
        }
        wrapped
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

fn push_segment(key: &str, parts: &mut Vec<Segment>, buf: &mut String, quoted: bool) -> Result<()> {
    let text = std::mem::take(buf);

    // A quoted run protects the segment from index and empty handling
    if quoted {
        parts.push(Segment::Name(text));
        return Ok(());
    }
    if let Ok(i) = text.parse::<i64>() {
        if parts.is_empty() {
            return Err(Error::new(ErrorKind::FirstKeySegmentInt { key: key.into() }));
        }
        parts.push(Segment::Index(i));
        return Ok(());
    }
    if text.is_empty() {
        return Err(Error::new(ErrorKind::EmptyKeySegment { key: key.into() }));
    }
    parts.push(Segment::Name(text));
    Ok(())
}
