use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("document source not found: {0}")]
    NotFound(String),
    #[error("failed to read document source {reference}: {source}")]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document {0} has zero-length content")]
    EmptyInput(String),
    #[error("unsupported media type '{media_type}' for {filename}")]
    UnsupportedMedia { media_type: String, filename: String },
    #[error("run cancelled before page {0}")]
    Cancelled(u32),
}

impl PipelineError {
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::EmptyInput(_) | Self::UnsupportedMedia { .. })
    }
}
