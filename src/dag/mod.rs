// src/dag/mod.rs

//! Dependency graph resolution for task specs.

pub mod graph;

pub use graph::TaskGraph;
