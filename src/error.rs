use crate::{auth::LookupError, transport::TransportError};

/// The upstream pages did not have the shape we expect.
#[derive(thiserror::Error, Debug)]
pub enum StructureError {
    #[error("no player links found")]
    NoPlayerLinks,
    #[error("no iframe found")]
    NoIframe,
    #[error("all player links failed: {0}")]
    AllPlayersFailed(#[source] TransportError),
    #[error("missing params: {}", .0.join(", "))]
    MissingParams(Vec<&'static str>),
    #[error("unable to extract server lookup URL")]
    NoLookupPath,
    #[error("invalid url {0}")]
    InvalidUrl(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("unable to extract channel ID from {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Structure(#[from] StructureError),
    #[error("auth failed: {0}")]
    AuthFailed(#[source] TransportError),
    #[error("server lookup failed: {0}")]
    ServerLookup(#[from] LookupError),
}

/// What callers of [`Extractor::extract`](crate::pipeline::Extractor::extract)
/// see, whatever went wrong underneath.
#[derive(thiserror::Error, Debug)]
#[error("DLHD extraction failed: {0}")]
pub struct ExtractionError(#[from] pub ResolveError);

impl ExtractionError {
    pub fn cause(&self) -> &ResolveError {
        &self.0
    }
}
