//! # cyberdeck-core
//!
//! Core data model for the cyberdeck subsystem manager.
//!
//! This crate provides:
//! - Typed configuration records and the shared `set_config` mutation routine
//! - Status records with atomic snapshot replacement
//! - The telemetry bus `Packet` and the normalized position report
//! - The configuration document and its storage abstraction
//!
//! This crate is intentionally runtime-agnostic and contains no async code.

pub mod config;
pub mod document;
pub mod model;
pub mod status;

pub use config::{ConfigError, ConfigRecord, ConfigValue, TypeTag};
pub use document::{ConfigDocument, ConfigStorage, Section, ServerSettings};
pub use model::*;
pub use status::{Status, StatusCell};
