use burn::record::RecorderError;
use rand::distributions::WeightedError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    Shape {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not draw a code at row {row}, column {column}: {source}")]
    Sampling {
        row: usize,
        column: usize,
        #[source]
        source: WeightedError,
    },

    #[error("model record: {0:?}")]
    Recorder(RecorderError),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<RecorderError> for Error {
    fn from(err: RecorderError) -> Self {
        Error::Recorder(err)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn check_shape(context: &'static str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::Shape {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}
