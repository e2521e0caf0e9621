//! Query Layer - the read paths over the document store
//!
//! - listing by tenant (and optionally index), newest first
//! - AND-intersection search by tag set

pub mod builder;
pub mod engine;

pub use builder::{CompiledQuery, DocumentQuery};
pub use engine::SearchQueryEngine;
