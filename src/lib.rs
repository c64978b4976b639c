//! Music Library - the local library engine of a self-hosted media server.
//!
//! Scans configured directories for audio files, indexes their tags into a
//! SQLite catalog through a single-writer job queue, keeps the catalog in
//! sync with the filesystem through a directory watch and a cleanup sweep,
//! and answers search and browse queries.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod metadata;
pub mod model;
pub mod scanner;
#[cfg(test)]
pub mod test_utils;
