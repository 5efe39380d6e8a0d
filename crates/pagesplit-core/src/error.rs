use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageSplitError {
    #[error("Failed to parse PDF: {0}")]
    ParseError(String),

    #[error("Document has no pages")]
    EmptyDocument,

    #[error("Failed to extract page {index}: {reason}")]
    PageExtraction { index: usize, reason: String },

    #[error("Failed to decode image: {0}")]
    DecodeError(String),

    #[error("Failed to encode image: {0}")]
    EncodeError(String),
}
