//! Library-facing error kinds (spec §7, ambient stack's "Error handling").
//!
//! Precondition violations (spec §7.4) are deliberately *not* represented
//! here: the spec classifies them as programming errors that must
//! terminate execution rather than be papered over, so they stay
//! `assert!`/`debug_assert!` panics throughout the crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported destination format: {0}")]
    UnsupportedFormat(String),

    #[error("allocation failed: {0}")]
    Alloc(String),

    #[error("scaler/repack backend failure: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, Error>;
