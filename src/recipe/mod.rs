//! Recipe Execution Engine
//!
//! 레시피 디렉토리의 이름 있는 레시피를 프로젝트 하나에 대해 실행합니다.
//! 실행은 Pending -> Running -> (Succeeded | Failed) 순서로만 진행되고,
//! 성공한 실행만 히스토리에 정확히 한 번 기록됩니다.
//! 실패 전까지 저장된 테이블은 롤백하지 않습니다.

pub mod context;
pub mod script;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::commands::history::append_history;
use crate::config::AppConfig;
use crate::db::{TableStore, DEFAULT_BUSY_TIMEOUT};
use crate::error::{DalError, Result};
use crate::models::{HistoryEntry, RecipeRunResult};
use crate::utils::ensure_within;

pub use context::{RecipeContext, DEFAULT_TIME_COLUMN};
pub use script::RecipeDocument;

/// 레시피 확장자
pub const RECIPE_EXTENSION: &str = "json";

/// 레시피 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Succeeded)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

/// 한 번의 실행 상태 추적
#[derive(Debug)]
struct RecipeRun {
    status: RunStatus,
}

impl RecipeRun {
    fn new() -> Self {
        Self {
            status: RunStatus::Pending,
        }
    }

    fn advance(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DalError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// 엔진이 실행할 수 있는 레시피
pub trait RecipeScript {
    fn execute(&self, ctx: &mut RecipeContext<'_>) -> Result<()>;
}

/// 클로저를 레시피로 감싸기 (테스트/내장 레시피용)
pub struct FnRecipe<F>(F);

impl<F> FnRecipe<F>
where
    F: Fn(&mut RecipeContext<'_>) -> Result<()>,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> RecipeScript for FnRecipe<F>
where
    F: Fn(&mut RecipeContext<'_>) -> Result<()>,
{
    fn execute(&self, ctx: &mut RecipeContext<'_>) -> Result<()> {
        (self.0)(ctx)
    }
}

/// 레시피 문서를 실행 시점에 읽습니다. 읽기/파싱 실패도 실행 실패로 기록됩니다.
struct DocumentRecipe {
    path: PathBuf,
}

impl RecipeScript for DocumentRecipe {
    fn execute(&self, ctx: &mut RecipeContext<'_>) -> Result<()> {
        RecipeDocument::from_file(&self.path)?.execute(ctx)
    }
}

#[derive(Debug, Clone)]
pub struct RecipeEngine {
    recipes_root: PathBuf,
    busy_timeout: Duration,
}

impl RecipeEngine {
    pub fn new(recipes_root: impl Into<PathBuf>) -> Self {
        Self {
            recipes_root: recipes_root.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            recipes_root: config.recipes_root.clone(),
            busy_timeout: config.busy_timeout,
        }
    }

    pub fn recipes_root(&self) -> &Path {
        &self.recipes_root
    }

    /// 사용 가능한 레시피 파일 이름 (정렬). 디렉토리가 없으면 빈 목록
    pub fn list_recipes(&self) -> Result<Vec<String>> {
        if !self.recipes_root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.recipes_root)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(RECIPE_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// 레시피 이름 -> 경로. 확장자가 없으면 `.json`을 붙입니다.
    pub fn resolve_recipe(&self, recipe_name: &str) -> Result<PathBuf> {
        if recipe_name.trim().is_empty() {
            return Err(DalError::InvalidInput("recipe name is empty".to_string()));
        }
        let file_name = if Path::new(recipe_name).extension().is_some() {
            recipe_name.to_string()
        } else {
            format!("{}.{}", recipe_name, RECIPE_EXTENSION)
        };
        let path = ensure_within(&self.recipes_root, &self.recipes_root.join(file_name))?;
        if !path.is_file() {
            return Err(DalError::RecipeNotFound(recipe_name.to_string()));
        }
        Ok(path)
    }

    /// 레시피 디렉토리의 레시피 실행
    ///
    /// 이름 해석 실패(RecipeNotFound, PathEscape)는 실행 전에 `Err`로 반환됩니다.
    /// 레시피 안의 실패는 `Ok(status = Failed)`입니다.
    pub fn run(
        &self,
        project_root: &Path,
        recipe_name: &str,
        params: &Map<String, Value>,
    ) -> Result<RecipeRunResult> {
        let path = self.resolve_recipe(recipe_name)?;
        let recorded_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(recipe_name)
            .to_string();
        self.run_script(project_root, &recorded_name, &DocumentRecipe { path }, params)
    }

    /// 임의의 [`RecipeScript`] 실행
    pub fn run_script(
        &self,
        project_root: &Path,
        recipe_name: &str,
        script: &dyn RecipeScript,
        params: &Map<String, Value>,
    ) -> Result<RecipeRunResult> {
        let store = TableStore::new(project_root).with_busy_timeout(self.busy_timeout);
        let mut run = RecipeRun::new();
        run.advance(RunStatus::Running)?;
        info!(recipe = recipe_name, project = %project_root.display(), "recipe started");

        let mut ctx = RecipeContext::new(&store, params);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| script.execute(&mut ctx)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(failure_message(&e)),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        let (mut logs, outputs) = ctx.into_parts();

        let error = match failure {
            None => {
                append_history(
                    project_root,
                    HistoryEntry {
                        recipe: recipe_name.to_string(),
                        parameters: params.clone(),
                        outputs: outputs.clone(),
                        logs: logs.clone(),
                        ran_at: Some(chrono::Utc::now().timestamp_millis()),
                    },
                )?;
                run.advance(RunStatus::Succeeded)?;
                info!(recipe = recipe_name, outputs = ?outputs, "recipe succeeded");
                None
            }
            Some(message) => {
                run.advance(RunStatus::Failed)?;
                warn!(recipe = recipe_name, error = %message, "recipe failed");
                logs.push(format!("Recipe failed: {}", message));
                Some(message)
            }
        };

        Ok(RecipeRunResult {
            recipe: recipe_name.to_string(),
            status: run.status,
            logs,
            outputs,
            error,
        })
    }
}

fn failure_message(error: &DalError) -> String {
    match error {
        DalError::RecipeFailure(message) => message.clone(),
        other => other.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}
