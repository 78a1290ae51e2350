//! ArtReport - marketing reports for fine art photographs
//!
//! An event bus drives a task graph of model calls (critique, medium
//! previews, research, pricing, product copy, campaigns, social channels)
//! and an assembler that writes the results into one HTML report.

pub mod analysis;
pub mod bus;
pub mod catalog;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod graph;
pub mod llm;
pub mod models;
pub mod report;
pub mod storage;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
