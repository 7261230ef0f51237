use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("malformed JSON document: {0}")]
    Json(serde_json::Error),
    #[error("unexpected document shape: {0}")]
    Shape(String),
}

impl DocumentError {
    pub(crate) fn shape(message: impl Into<String>) -> Self {
        Self::Shape(message.into())
    }
}

impl From<serde_json::Error> for DocumentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}
