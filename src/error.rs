//! DataAnalyzer Error Types
//!
//! 라이브러리 전역 에러 타입 정의

use serde::Serialize;
use thiserror::Error;

use crate::recipe::RunStatus;

/// DataAnalyzer 에러
#[derive(Error, Debug)]
pub enum DalError {
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// 저장소 파일이 잠겨 있거나 손상됨
    #[error("Table store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Path escapes project scope: {0}")]
    PathEscape(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Missing column '{column}' in table '{table}'")]
    MissingColumn { table: String, column: String },

    #[error("Recipe not found: {0}")]
    RecipeNotFound(String),

    #[error("Recipe failed: {0}")]
    RecipeFailure(String),

    #[error("Invalid run state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: RunStatus, to: RunStatus },

    #[error("Import error: {0}")]
    Import(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<rusqlite::Error> for DalError {
    fn from(error: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match error.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::CannotOpen,
            ) => DalError::StoreUnavailable(error.to_string()),
            _ => DalError::Database(error),
        }
    }
}

impl DalError {
    /// CLI/외부 호출자에게 노출되는 안정적인 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            DalError::Database(_) => "DB_ERROR",
            DalError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            DalError::Io(_) => "IO_ERROR",
            DalError::Serialization(_) => "SERIALIZATION_ERROR",
            DalError::Spreadsheet(_) => "SPREADSHEET_ERROR",
            DalError::Archive(_) => "ARCHIVE_ERROR",
            DalError::Template(_) => "TEMPLATE_ERROR",
            DalError::PathEscape(_) => "PATH_ESCAPE",
            DalError::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            DalError::TableNotFound(_) => "TABLE_NOT_FOUND",
            DalError::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND",
            DalError::MissingColumn { .. } => "MISSING_COLUMN",
            DalError::RecipeNotFound(_) => "RECIPE_NOT_FOUND",
            DalError::RecipeFailure(_) => "RECIPE_FAILURE",
            DalError::InvalidStateTransition { .. } => "INVALID_STATE",
            DalError::Import(_) => "IMPORT_ERROR",
            DalError::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}

/// 라이브러리 결과 타입
pub type Result<T> = std::result::Result<T, DalError>;

/// CLI 응답용 직렬화 가능한 에러
#[derive(Debug, Serialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl From<DalError> for CommandError {
    fn from(error: DalError) -> Self {
        let details = match &error {
            DalError::MissingColumn { table, .. } => Some(format!("table={}", table)),
            DalError::Database(inner) => inner.sqlite_error_code().map(|c| format!("{:?}", c)),
            _ => None,
        };

        CommandError {
            code: error.code().to_string(),
            message: error.to_string(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_carries_stable_code() {
        let err = CommandError::from(DalError::TableNotFound("sensor".to_string()));
        assert_eq!(err.code, "TABLE_NOT_FOUND");
        assert!(err.message.contains("sensor"));
    }

    #[test]
    fn test_missing_column_details() {
        let err = CommandError::from(DalError::MissingColumn {
            table: "y".to_string(),
            column: "ts".to_string(),
        });
        assert_eq!(err.code, "MISSING_COLUMN");
        assert_eq!(err.details.as_deref(), Some("table=y"));
    }
}
