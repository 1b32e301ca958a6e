use std::io;

/// A convenience [`Result`] for the Plansight facade.
pub type PlansightResult<T> = Result<T, PlansightError>;

#[derive(thiserror::Error, Debug)]
pub enum PlansightError {
    #[error("Unable to bind to {1}: {0}")]
    BindingError(#[source] io::Error, String),

    #[error("Invalid value {1:?} for {0}")]
    ConfigValue(&'static str, String),

    #[error(transparent)]
    LlmError(#[from] plansight_core::llm::LlmError),

    #[error(transparent)]
    OcrError(#[from] plansight_core::ocr::OcrError),

    #[error(transparent)]
    TileError(#[from] plansight_core::tiles::TileError),

    #[error(transparent)]
    WebError(#[from] actix_web::Error),

    #[error(transparent)]
    IoError(#[from] io::Error),
}
