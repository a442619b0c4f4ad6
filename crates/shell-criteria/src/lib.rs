//! Value store and criteria language for shell automation
//!
//! This crate holds the state that command output is extracted into and the
//! small boolean language used to decide when an automation loop is done:
//!
//! ```
//! use shell_criteria::{ValueStore, parse};
//!
//! let mut store = ValueStore::new();
//! store.set("build.status", "done");
//!
//! let criteria = parse("$build.status:!running && ${build.status} = done").unwrap();
//! assert!(criteria.evaluate(&store).unwrap());
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod store;

pub use error::{Error, Result};
pub use evaluator::evaluate;
pub use model::{Comparison, Criteria, Criterion, LogicalOperator, Operator};
pub use parser::parse;
pub use store::{ValueStore, value_to_string};
