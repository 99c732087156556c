//! Error types for Gridfill core.

use thiserror::Error;

use gridfill_engine::engine::FillFailure;

/// Errors that can occur loading, filling or saving a workbook
#[derive(Error, Debug)]
pub enum GridfillError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Fill failed: {0}")]
    Fill(#[from] FillFailure),

    #[error("Invalid JSON data: {0}")]
    Json(#[from] serde_json::Error),
}

impl GridfillError {
    /// Non-fatal diagnostics recorded before a fill failed.
    pub fn diagnostics(&self) -> &[gridfill_engine::engine::Diagnostic] {
        match self {
            GridfillError::Fill(failure) => &failure.diagnostics,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, GridfillError>;
