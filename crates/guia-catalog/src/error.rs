#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog io error: {0}")]
    Io(String),

    #[error("catalog parse error: {0}")]
    Parse(String),

    #[error("invalid catalog document: {0}")]
    Invalid(String),
}
