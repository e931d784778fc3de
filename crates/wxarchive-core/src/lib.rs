//! Core wxarchive library (config, logging, message model, archiver).

pub mod archive;
pub mod client;
pub mod config;
pub mod logging;
pub mod message;
