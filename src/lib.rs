//! # lattice-config
//!
//! Hierarchical, schema-driven configuration trees with lazy cross-references and a
//! full assignment history.
//!
//! ## Overview
//!
//! A configuration is a tree of nodes built from reusable [`schema::Schema`]
//! fragments ("experiment contains model contains optimizer"). Any field may hold a
//! [`reference::Reference`] to another field by relative path, so a child can
//! derive its value from a parent field whose final value is not yet known when the
//! child is declared. References are resolved against the live tree on every read.
//!
//! ### Key Features
//!
//! - **Composable schemas**: `extends` with last-declared-wins and explicit conflicts
//! - **Relative references**: `.x` (sibling), `..x` (parent), `...a.b` (two up, then down)
//! - **Live resolution**: overrides upstream of a reference are visible through it
//! - **Atomic merges**: an override mapping is validated in full before it is applied
//! - **Assignment history**: every write is recorded with its origin and source location
//! - **Diagnostics**: fields that started undefined or flip-flopped are flagged
//!
//! ## Architecture
//!
//! - **[`paths`]**: reference path parsing (`RefPath`, `Step`)
//! - **[`value`]**, **[`reference`]**: dynamic field values, lazy references and computed fields
//! - **[`schema`]**: schema declaration and composition
//! - **[`tree`]**: the node arena (`ConfigTree`, `ConfigNode`) and construction
//! - **[`resolve`]**: reference resolution with cycle detection
//! - **[`merge`]**: override application
//! - **[`history`]**, **[`diagnose`]**: the assignment log and findings over it
//! - **[`config`]**: TOML override files, assignments, schema files and export
//!
//! ## Quick Start
//!
//! ```rust
//! use lattice_config::{schema::Schema, tree::ConfigTree, value::Value};
//! use std::collections::BTreeMap;
//!
//! # fn main() -> Result<(), lattice_config::LatticeError> {
//! let optimizer = Schema::builder("Optimizer")
//!     .reference("lr", "..base_lr")
//!     .field("momentum", 0.9)
//!     .build()?;
//! let experiment = Schema::builder("Experiment")
//!     .field("base_lr", 0.1)
//!     .nested("optimizer", &optimizer)
//!     .build()?;
//!
//! let mut tree = ConfigTree::build(&experiment)?;
//! assert_eq!(tree.lookup("optimizer.lr")?, Value::Float(0.1));
//!
//! tree.merge(&BTreeMap::from([("base_lr".to_string(), Value::Float(0.01))]))?;
//! assert_eq!(tree.lookup("optimizer.lr")?, Value::Float(0.01));
//! assert_eq!(tree.all_history()["base_lr"].len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **default**: the library
//! - **bin**: the `lattice` command line tool (`clap`, `tracing-subscriber`)

pub mod config;
pub mod diagnose;
pub mod error;
pub mod history;
pub mod merge;
pub mod paths;
pub mod reference;
pub mod resolve;
pub mod schema;
#[cfg(test)]
mod tests;
pub mod tree;
pub mod value;

pub use error::*;
pub use merge::Overrides;
pub use reference::{Computed, Reference};
pub use schema::Schema;
pub use tree::{ConfigTree, NodeId};
pub use value::Value;
