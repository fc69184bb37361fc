//! This module aggregates various utility submodules used throughout the application.

/// Environment-driven configuration.
pub mod config;
