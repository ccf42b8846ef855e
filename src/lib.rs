//! # py-mutation
//!
//! Generates the queue of candidate mutations for mutation testing of Python
//! code bases.
//!
//! This library provides functionality to:
//! - Build the catalog of relational-operator replacement operators
//! - Discover Python modules and apply exclusion globs
//! - Restrict mutations to lines changed since a git baseline
//! - Walk each module's syntax tree and emit one work item per mutation site
//! - Store a session's configuration and work items in SQLite
//!
//! ## Example
//!
//! ```rust,no_run
//! use py_mutation::config::SessionConfig;
//! use py_mutation::mutation::init_session;
//! use py_mutation::sqlite::WorkDb;
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::load(Path::new("mutation.toml"))?;
//!     let mut work_db = WorkDb::open(Path::new("session.sqlite"))?;
//!     let count = init_session(&config, &mut work_db, Path::new("."))?;
//!     println!("{} work items", count);
//!     Ok(())
//! }
//! ```

pub mod ast;
pub mod config;
pub mod error;
pub mod git_changes;
pub mod modules;
pub mod mutation;
pub mod operators;
pub mod sqlite;
pub mod work_item;

pub use error::{MutationError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::ast::{filter_nodes, parse_module, LocatedNode, ParsedModule};
    pub use crate::config::SessionConfig;
    pub use crate::error::{MutationError, Result};
    pub use crate::git_changes::{git_filters, DiffLineSet};
    pub use crate::modules::{filter_paths, find_modules};
    pub use crate::mutation::{all_work_items, init, init_session};
    pub use crate::operators::{MutationOperator, OperatorCatalog, Position, RelOp};
    pub use crate::sqlite::WorkDb;
    pub use crate::work_item::{WorkItem, WorkStore};
}
