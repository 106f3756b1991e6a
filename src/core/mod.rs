//! Core application modules
//!
//! This module contains configuration, constants, logging, backend providers,
//! error normalization, and token counting.

pub mod config;
pub mod constants;
pub mod error_mapper;
pub mod logging;
pub mod model_manager;
pub mod provider;
pub mod providers;
pub mod tokenizer;
