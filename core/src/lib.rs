//! Embeddable expression and template language.
//!
//! ```
//! use glint_core::{expr, value::{Value, Variables}};
//!
//! let value = expr::eval("1 + 2 * 3", Value::Null, &Variables::new()).unwrap();
//! assert_eq!(value, Value::Int(7));
//! ```
pub mod cache;
pub mod error;
pub mod expr;
pub mod service;
pub mod types;
mod utils;
pub mod value;

pub use error::Error;
