//! 실행 설정
//!
//! 프로세스 시작 시 한 번 만들고 이후에는 읽기 전용으로 각 저장소 생성자에 전달합니다.
//! 우선순위: 명시적 값(CLI) > 환경 변수(`.env` 포함) > 기본값

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::db::DEFAULT_BUSY_TIMEOUT;
use crate::error::Result;

pub const PROJECTS_DIR_ENV: &str = "DATA_ANALYZER_PROJECTS_DIR";
pub const RECIPES_DIR_ENV: &str = "DATA_ANALYZER_RECIPES_DIR";
pub const BUSY_TIMEOUT_ENV: &str = "DATA_ANALYZER_BUSY_TIMEOUT_MS";

const DEFAULT_PROJECTS_DIR: &str = "data/projects";
const DEFAULT_RECIPES_DIR: &str = "recipes";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 모든 프로젝트 디렉토리의 상위 디렉토리
    pub projects_root: PathBuf,
    /// 레시피 문서 디렉토리 (레시피는 이 밖을 참조할 수 없음)
    pub recipes_root: PathBuf,
    pub busy_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            projects_root: PathBuf::from(DEFAULT_PROJECTS_DIR),
            recipes_root: PathBuf::from(DEFAULT_RECIPES_DIR),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn new(projects_root: impl Into<PathBuf>, recipes_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
            recipes_root: recipes_root.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// `.env`(있으면)와 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        // production에서는 파일이 없을 수 있으므로 실패해도 무시
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }

        let mut config = Self::default();
        if let Some(dir) = non_empty_env(PROJECTS_DIR_ENV) {
            config.projects_root = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_env(RECIPES_DIR_ENV) {
            config.recipes_root = PathBuf::from(dir);
        }
        if let Some(raw) = non_empty_env(BUSY_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.busy_timeout = Duration::from_millis(ms),
                Err(_) => warn!(value = %raw, "ignoring invalid {}", BUSY_TIMEOUT_ENV),
            }
        }
        config
    }

    pub fn with_projects_root(mut self, dir: Option<&Path>) -> Self {
        if let Some(dir) = dir {
            self.projects_root = dir.to_path_buf();
        }
        self
    }

    pub fn with_recipes_root(mut self, dir: Option<&Path>) -> Self {
        if let Some(dir) = dir {
            self.recipes_root = dir.to_path_buf();
        }
        self
    }

    /// 프로젝트 루트 디렉토리 생성 (시작 시 1회)
    pub fn initialize(&self) -> Result<()> {
        std::fs::create_dir_all(&self.projects_root)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.projects_root, PathBuf::from("data/projects"));
        assert_eq!(config.recipes_root, PathBuf::from("recipes"));
        assert_eq!(config.busy_timeout, DEFAULT_BUSY_TIMEOUT);
    }

    #[test]
    fn test_explicit_overrides() {
        let config = AppConfig::default()
            .with_projects_root(Some(Path::new("/tmp/p")))
            .with_recipes_root(None);
        assert_eq!(config.projects_root, PathBuf::from("/tmp/p"));
        assert_eq!(config.recipes_root, PathBuf::from("recipes"));
    }

    #[test]
    fn test_initialize_creates_projects_root() {
        let dir = tempdir().unwrap();
        let config = AppConfig::new(dir.path().join("a/b/projects"), dir.path().join("recipes"));
        config.initialize().unwrap();
        config.initialize().unwrap();
        assert!(config.projects_root.is_dir());
    }
}
