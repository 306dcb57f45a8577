//! strata-core: hierarchical configuration data lookup
//!
//! Given a key, the engine searches an ordered hierarchy of data sources
//! (YAML/JSON files, the environment, pluggable backends), merges the hits
//! according to a declared strategy, interpolates `%{...}` expressions
//! against the caller's scope, optionally asserts the resolved type, and
//! returns the value.
//!
//! # Example
//!
//! ```no_run
//! use strata_core::{Invocation, Scope, Session};
//!
//! let session = Session::new("/etc/myapp")?;
//! let mut inv = Invocation::new(Scope::new());
//! let value = session.lookup(&mut inv, "database.host", None, &Default::default())?;
//! println!("{}", value);
//! # Ok::<(), strata_core::Error>(())
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod explain;
pub mod invocation;
pub mod key;
pub mod location;
pub mod merge;
pub mod provider;
pub mod value;
pub mod vtype;

mod interpolate;
mod lookup;

pub use command::{lookup_and_render, CommandOptions, RenderAs};
pub use config::{Config, ResolvedConfig};
pub use error::{Error, ErrorKind, Result};
pub use explain::{ExplainMode, Explainer};
pub use invocation::{CancelToken, Invocation, Scope};
pub use key::{Key, Segment};
pub use lookup::{Session, SessionBuilder};
pub use merge::MergeStrategy;
pub use provider::{FunctionRegistry, ProviderContext};
pub use value::Value;
pub use vtype::ValueType;
