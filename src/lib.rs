//! # MediRAG (library root)
//!
//! Retrieval-augmented question answering over the structured clinical records of a
//! Parkinson's follow-up application.
//!
//! - Record access over the application's SQLite database (`records`, `schema`, `models`).
//! - Chunking, embeddings and the vector index (`chunker`, `embeddings`, `vector_store`).
//! - Snapshot publication and search (`retrieval`), kept fresh by `freshness`.
//! - Form-field and identity fast paths (`field_resolver`).
//! - Answer generation over an OpenAI-compatible backend (`generator`, `api`).
//! - The shared façade (`service`), HTTP API (`server`), CLI (`commands`, `interactive`).
//!
//! ## Modules
//! - [`api`], [`chunker`], [`commands`], [`config`], [`embeddings`], [`error`],
//!   [`field_resolver`], [`freshness`], [`generator`], [`interactive`], [`models`],
//!   [`records`], [`retrieval`], [`schema`], [`server`], [`service`], [`vector_store`]

use directories::ProjectDirs;

pub mod api;
pub mod chunker;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod field_resolver;
pub mod freshness;
pub mod generator;
pub mod interactive;
pub mod models;
pub mod records;
pub mod retrieval;
pub mod schema;
pub mod server;
pub mod service;
pub mod vector_store;

use error::ConfigError;

/// Return the per-platform configuration directory used by MediRAG.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "medidiagnose", "medirag")`, so you get the right place on each OS
/// (e.g., `~/.config/medirag` on Linux).
///
/// The directory is **not** created by this function.
///
/// # Errors
/// Returns [`ConfigError::NoConfigDir`] if the platform configuration directory cannot be
/// determined (which is rare but possible in heavily sandboxed environments).
///
/// # Examples
/// ```rust
/// if let Ok(dir) = medirag::config_dir() {
///     println!("config at {}", dir.display());
/// }
/// ```
pub fn config_dir() -> Result<std::path::PathBuf, ConfigError> {
    let proj_dirs =
        ProjectDirs::from("com", "medidiagnose", "medirag").ok_or(ConfigError::NoConfigDir)?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
