// src/config/mod.rs

//! Pipeline configuration: model, loading, validation.
//!
//! The loaded [`Config`] is immutable and threaded explicitly (behind an
//! `Arc`) into graph construction and run actions. Nothing in the crate
//! reads configuration through ambient state.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{CityConfig, Config, DatabaseSection, FeedFormat, PipelineSection};
