use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Debug, Error)]
pub enum Error {
    /// A transform, codec, phase or edit step failed inside a pipeline stage.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: melcanvas_core::Error,
    },

    /// Reading or writing a file failed during a pipeline stage.
    #[error("{stage} stage failed on {}: {source}", .path.display())]
    File {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("audio decoding failed: {0}")]
    Audio(String),

    #[error(transparent)]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A configuration value was rejected before any transform was built.
    #[error("invalid configuration: {0}")]
    Config(#[source] melcanvas_core::Error),

    /// Image sidecar metadata disagrees with the pipeline or with its image.
    #[error("sidecar mismatch: {0}")]
    SidecarMismatch(String),
}

impl Error {
    /// `Config` carrying an `InvalidParameter`.
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Error::Config(melcanvas_core::Error::InvalidParameter(message.into()))
    }

    /// Core error behind a stage or configuration failure, if there is one.
    pub fn core(&self) -> Option<&melcanvas_core::Error> {
        match self {
            Error::Stage { source, .. } | Error::Config(source) => Some(source),
            Error::File { source, .. } => source.core(),
            _ => None,
        }
    }

    /// The pipeline stage that failed, if the error happened inside one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } | Error::File { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Tags core results with the pipeline stage they came from.
pub(crate) trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T>;
}

impl<T> AtStage<T> for melcanvas_core::Result<T> {
    fn at(self, stage: Stage) -> Result<T> {
        self.map_err(|source| Error::Stage { stage, source })
    }
}

/// Tags file reads and writes with the stage and the path involved.
pub(crate) trait AtFile<T> {
    fn at_file(self, stage: Stage, path: &Path) -> Result<T>;
}

impl<T> AtFile<T> for Result<T> {
    fn at_file(self, stage: Stage, path: &Path) -> Result<T> {
        self.map_err(|source| match source {
            // already tagged further down
            Error::Stage { .. } | Error::File { .. } => source,
            other => Error::File {
                stage,
                path: path.to_path_buf(),
                source: Box::new(other),
            },
        })
    }
}
