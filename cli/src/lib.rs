//! Line oriented shell over glint expressions and templates.
pub mod json;
pub mod worker;
