//! Core AI provider types, traits, and utilities
//!
//! This module contains the provider trait implemented by every remote model
//! backend, plus the shared HTTP client builder and stream line buffering.

pub mod provider_base;
pub mod providers;

pub use provider_base::*;
pub use providers::*;
