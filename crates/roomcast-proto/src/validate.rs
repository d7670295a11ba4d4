//! Content validation shared by every ingestion path.

use thiserror::Error;

/// Maximum message length, counted in Unicode scalar values.
pub const MAX_CONTENT_CHARS: usize = 5000;

/// Why a piece of message content was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    /// Content was empty.
    #[error("message content cannot be empty")]
    Empty,
    /// Content exceeded [`MAX_CONTENT_CHARS`].
    #[error("message content too long (max {MAX_CONTENT_CHARS} characters)")]
    TooLong,
}

/// Validate message content: non-empty and at most [`MAX_CONTENT_CHARS`]
/// characters. Applied uniformly on both the client endpoint and the
/// inter-node `forward_message` path.
pub fn validate_content(content: &str) -> Result<(), ContentError> {
    if content.is_empty() {
        return Err(ContentError::Empty);
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ContentError::TooLong);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_rejected() {
        assert_eq!(validate_content(""), Err(ContentError::Empty));
    }

    #[test]
    fn boundary_lengths() {
        let at_limit: String = "a".repeat(MAX_CONTENT_CHARS);
        assert_eq!(validate_content(&at_limit), Ok(()));

        let over_limit: String = "a".repeat(MAX_CONTENT_CHARS + 1);
        assert_eq!(validate_content(&over_limit), Err(ContentError::TooLong));
    }

    #[test]
    fn multibyte_content_counts_chars_not_bytes() {
        // 5000 snowmen are 15000 UTF-8 bytes but exactly at the limit.
        let snowmen: String = "☃".repeat(MAX_CONTENT_CHARS);
        assert_eq!(validate_content(&snowmen), Ok(()));
    }
}
