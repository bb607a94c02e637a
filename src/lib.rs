//! DataAnalyzer - 로컬 분석 프로젝트 백엔드 라이브러리
//!
//! 프로젝트 디렉토리(메타데이터 + SQLite 테이블 저장소 + 실행 기록) 관리와
//! 레시피 실행 엔진을 제공합니다.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod recipe;
pub mod utils;

pub use commands::project::ProjectStore;
pub use commands::storage::ProjectRegistry;
pub use config::AppConfig;
pub use db::{CellValue, Table, TableStore};
pub use error::{CommandError, DalError, Result};
pub use recipe::{RecipeContext, RecipeEngine, RecipeScript, RunStatus};
