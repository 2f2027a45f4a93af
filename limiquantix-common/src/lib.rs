//! # limiquantix Common
//!
//! Shared utilities for the limiquantix agent components.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use limiquantix_common::{init_logging, LoggingConfig};
//!
//! // Initialize with level
//! init_logging("info").unwrap();
//!
//! // Or from a config section
//! limiquantix_common::init_from_config(&LoggingConfig::default()).unwrap();
//! ```

pub mod logging;

pub use logging::{
    init_from_config,
    init_logging,
    init_logging_json,
    init_test_logging,
    LogFormat,
    LoggingConfig,
};
