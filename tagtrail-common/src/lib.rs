//! # Tagtrail Common Library
//!
//! Shared code for the tagtrail attribution and aggregation services:
//! - Database schema, initialization and row models
//! - Configuration loading
//! - UTC day-window helpers
//! - Power-user scoring model
//! - Identifier generation

pub mod config;
pub mod db;
pub mod error;
pub mod scoring;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use scoring::VisitorActivity;
pub use time::DayWindow;
