//! Error types shared by the runtime primitives.

/// A CSS `<time>` token that could not be read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CssTimeError {
    /// The token was empty after trimming.
    #[error("empty CSS time value")]
    Empty,
    /// The token is not a finite number followed by `s` or `ms`.
    #[error("invalid CSS time value `{0}`")]
    Invalid(String),
}
