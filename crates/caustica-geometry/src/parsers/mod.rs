//! File format parsers for reading meshes back in.
//!
//! Supported formats:
//! - [`.obj`](obj) — Wavefront OBJ mesh files

pub mod obj;

use thiserror::Error;

/// Errors during mesh file parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    FormatError { line: usize, message: String },
}
