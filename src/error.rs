// --- Файл: src/error.rs ---

//! Типы ошибок, общие для всех модулей крейта.

use thiserror::Error;

/// Ошибки сэмплера, нормализации, архива и метрик взаимной информации.
#[derive(Error, Debug)]
pub enum PrepError {
    /// Нарушено предусловие на аргументы вызова.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// В архиве нет обязательных массивов или формы несогласованы.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// Столбец нулевого размаха при min-max в строгом режиме.
    #[error("numeric degeneracy: column {column} has zero range ({value})")]
    NumericDegeneracy { column: usize, value: f32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SafeTensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl PrepError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        PrepError::InvalidArgument(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        PrepError::MalformedArchive(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
