#![forbid(unsafe_code)]

use kinet_core::KinetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UrlSyncError {
    #[error("invalid URL module options: {0}")]
    Options(#[source] serde_json::Error),

    #[error("history location `{href}` is not a valid URL: {source}")]
    InvalidUrl {
        href: String,
        #[source]
        source: url::ParseError,
    },

    #[error("the engine was dropped")]
    EngineGone,
}

impl From<UrlSyncError> for KinetError {
    fn from(err: UrlSyncError) -> Self {
        match err {
            UrlSyncError::Options(source) => KinetError::Json(source),
            other => KinetError::construction(other.to_string()),
        }
    }
}
