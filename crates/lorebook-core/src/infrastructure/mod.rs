//! Infrastructure layer
//!
//! Contains implementations for external systems, currently the SQLite
//! repository.

pub mod graph;
