use thiserror::Error;

/// Error kinds surfaced by the compilation pipeline.
///
/// Stages return `anyhow::Result`; these values travel inside the
/// `anyhow::Error` and can be recovered with `downcast_ref::<CompileError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{message} at line {line} col {col}")]
    Lexical {
        message: String,
        line: usize,
        col: usize,
    },

    #[error("{message} at line {line} col {col}")]
    Parse {
        message: String,
        line: usize,
        col: usize,
    },

    #[error("Unresolved symbol '{name}' at line {line} col {col}")]
    UnresolvedSymbol { name: String, line: usize, col: usize },
}

impl CompileError {
    pub fn position(&self) -> (usize, usize) {
        match self {
            CompileError::Lexical { line, col, .. }
            | CompileError::Parse { line, col, .. }
            | CompileError::UnresolvedSymbol { line, col, .. } => (*line, *col),
        }
    }
}
