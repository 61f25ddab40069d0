//! Bulk Processor Server Library
//!
//! Asynchronous file-processing pipeline: resumable chunked uploads, background
//! tasks with live progress and cooperative cancellation, and the processing
//! algorithms those tasks run. The server binary is in main.rs.
//!
//! # Modules
//!
//! - `upload`: chunked upload sessions and their scratch storage
//! - `tasks`: task state machine, progress channel, engine
//! - `processing`: row ingestion, PII masking, file splitting
//! - `db`: SQLite record store used as the ingestion sink
//! - `routes`: HTTP surface

pub mod config;
pub mod db;
pub mod error;
pub mod processing;
pub mod routes;
pub mod state;
pub mod tasks;
pub mod upload;
