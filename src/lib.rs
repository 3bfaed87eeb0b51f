//! Probes hosted prediction APIs for demographic bias.
//!
//! An analysis synthesizes a test population, submits every record to the
//! target prediction endpoint, aggregates fairness statistics over the
//! returned predictions, and renders a report. Progress is persisted after
//! every unit of work so that clients can poll an analysis while it executes.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod analysis;
pub mod commands;
pub mod config;
pub mod database;
pub mod endpoint;
pub mod execution;
pub mod inference;
pub mod report;
pub mod server;
pub mod synthesis;
