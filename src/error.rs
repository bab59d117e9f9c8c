//! Error types shared by the library and the command-line tools.
//!
//! Every failure renders as a single `<kind>: <detail>` line; the binaries
//! prepend their own name so the user sees `<tool>: <kind>: <detail>` on
//! stderr. Division by a concrete zero is *not* an error anywhere in this
//! crate: it is a lattice event handled by the abstract domains.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Wrong number or shape of command-line arguments.
    #[error("usage: {0}")]
    Usage(String),

    /// The input file could not be read.
    #[error("usage: {0}")]
    Io(#[from] std::io::Error),

    /// The LIR JSON was malformed.
    #[error("parse: {0}")]
    Json(#[from] serde_json::Error),

    /// The LIR was well-formed JSON but violated a structural invariant.
    #[error("parse: {0}")]
    Invalid(String),

    /// The requested function does not exist in the program.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A terminal referenced a basic-block label that does not exist.
    #[error("unknown block: {label} in function {func}")]
    UnknownBlock { func: String, label: String },

    /// An operation was applied to operands of an incompatible type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A constraint file could not be parsed.
    #[error("parse: {0}")]
    Constraint(String),
}

pub type Result<T> = std::result::Result<T, Error>;
