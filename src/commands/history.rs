//! Recipe History
//!
//! `recipe_history.json`: 실행 기록 배열 (오래된 것부터). 추가만 하고 수정/삭제하지 않습니다.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::HistoryEntry;
use crate::utils::{ensure_within, read_json, write_json_atomic};

pub const HISTORY_FILE: &str = "recipe_history.json";

fn history_path(project_root: &Path) -> Result<PathBuf> {
    ensure_within(project_root, &project_root.join(HISTORY_FILE))
}

/// 히스토리 목록 조회 (문서가 없으면 빈 목록)
pub fn list_history(project_root: &Path) -> Result<Vec<HistoryEntry>> {
    let path = history_path(project_root)?;
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_json(&path)
}

/// 항목 하나 추가 후 전체 문서 재작성. 추가 후 항목 수를 반환합니다.
pub fn append_history(project_root: &Path, entry: HistoryEntry) -> Result<usize> {
    let path = history_path(project_root)?;
    let mut history: Vec<HistoryEntry> = if path.exists() {
        read_json(&path)?
    } else {
        Vec::new()
    };
    history.push(entry);
    write_json_atomic(&path, &history)?;
    Ok(history.len())
}
