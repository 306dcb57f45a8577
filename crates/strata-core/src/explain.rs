//! Lookup explanation
//!
//! The explainer records the decisions made during a lookup as a tree of
//! events: one branch per guarded scope (lookup, provider, location, merge,
//! interpolation, segment) and leaves for the outcomes. Pushes and pops are
//! balanced by construction since branches only open through the scoped
//! methods on `Invocation`.

use std::fmt::Write as _;

use serde::Serialize;

use crate::value::Value;

/// A single explanation event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Root,
    Lookup { key: String },
    SubLookup { key: String },
    Merge { strategy: String },
    DataProvider { provider: String },
    Location { location: String },
    Interpolation { expression: String },
    Segment { segment: String },
    InvalidKey { key: String },
    Found { key: String, value: Option<Value> },
    NotFound { key: String },
    LocationNotFound,
    MergeResult { value: Option<Value> },
    Text { message: String },
}

/// One node of the explanation tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    #[serde(flatten)]
    pub event: Event,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<Node>,
}

impl Node {
    fn new(event: Event) -> Self {
        Self {
            event,
            branches: Vec::new(),
        }
    }

    fn render(&self, depth: usize, out: &mut String) {
        if !matches!(self.event, Event::Root) {
            for _ in 0..depth {
                out.push_str("  ");
            }
            let _ = writeln!(out, "{}", self.describe());
        }
        let child_depth = if matches!(self.event, Event::Root) {
            depth
        } else {
            depth + 1
        };
        for branch in &self.branches {
            branch.render(child_depth, out);
        }
    }

    fn describe(&self) -> String {
        match &self.event {
            Event::Root => String::new(),
            Event::Lookup { key } => format!("Searching for \"{}\"", key),
            Event::SubLookup { key } => format!("Sub key: \"{}\"", key),
            Event::Merge { strategy } => format!("Merge strategy {}", strategy),
            Event::DataProvider { provider } => provider.clone(),
            Event::Location { location } => format!("Location \"{}\"", location),
            Event::Interpolation { expression } => {
                format!("Interpolation on \"{}\"", expression)
            }
            Event::Segment { segment } => format!("Segment \"{}\"", segment),
            Event::InvalidKey { key } => format!("Invalid key \"{}\"", key),
            Event::Found { key, value } => match value {
                Some(v) => format!("Found key: \"{}\" value: {}", key, v),
                None => format!("Found key: \"{}\" value: [redacted]", key),
            },
            Event::NotFound { key } => format!("No such key: \"{}\"", key),
            Event::LocationNotFound => "Location not found".to_string(),
            Event::MergeResult { value } => match value {
                Some(v) => format!("Merged result: {}", v),
                None => "Merged result: [redacted]".to_string(),
            },
            Event::Text { message } => message.clone(),
        }
    }
}

/// Which lookups the explainer records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainMode {
    /// Record the lookup of data
    Data,
    /// Record how lookup options were found
    Options,
    /// Record both
    Both,
}

/// Builder for the explanation tree
#[derive(Debug)]
pub struct Explainer {
    mode: ExplainMode,
    stack: Vec<Node>,
}

impl Explainer {
    pub fn new(mode: ExplainMode) -> Self {
        Self {
            mode,
            stack: vec![Node::new(Event::Root)],
        }
    }

    /// True when events from a lookup-options resolution should be recorded
    pub fn records_options(&self) -> bool {
        matches!(self.mode, ExplainMode::Options | ExplainMode::Both)
    }

    /// True when events from a data lookup should be recorded
    pub fn records_data(&self) -> bool {
        matches!(self.mode, ExplainMode::Data | ExplainMode::Both)
    }

    pub(crate) fn push(&mut self, event: Event) {
        self.stack.push(Node::new(event));
    }

    pub(crate) fn pop(&mut self) {
        // The root container never pops
        if self.stack.len() > 1 {
            let node = self.stack.pop().unwrap();
            self.stack.last_mut().unwrap().branches.push(node);
        }
    }

    pub(crate) fn leaf(&mut self, event: Event) {
        self.stack.last_mut().unwrap().branches.push(Node::new(event));
    }

    /// The finished tree. Any branch still open (a lookup that failed with
    /// an error) is folded into its parent first.
    pub fn finish(mut self) -> Node {
        while self.stack.len() > 1 {
            self.pop();
        }
        self.stack.pop().unwrap()
    }

    /// Render the finished tree as indented text
    pub fn render_text(self) -> String {
        let mut out = String::new();
        self.finish().render(0, &mut out);
        out
    }
}
