//! CLI command implementations.
//!
//! This module contains the implementation of each CLI command.

pub mod candidates;
pub mod dump;
pub mod resolve;
pub mod run;
