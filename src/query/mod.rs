//! Query compilation
//!
//! Turns a validated [`FilterSpec`](crate::filter::FilterSpec) into an
//! executable [`QueryPlan`]: a typed predicate tree plus the partitions to
//! scan and the execution target. Compilation is pure; validation errors
//! are its only observable effect besides the returned plan.
//!
//! ```text
//! FilterSpec
//!      │
//!      ▼
//! ┌───────────┐
//! │  Compile  │  chips → OR-groups, AND'd across types
//! └───────────┘
//!      │
//!      ▼
//! ┌───────────┐
//! │ QueryPlan │  predicate tree + partitions + target
//! └───────────┘
//!      │
//!      ▼
//!  Aggregation │ Histogram │ Export │ Search
//! ```

pub mod plan;
pub mod predicate;

pub use plan::{compile, QueryPlan, QueryTarget};
pub use predicate::{Column, Predicate};
