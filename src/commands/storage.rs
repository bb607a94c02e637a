//! Project Registry & Export
//!
//! - `index.json`: 프로젝트 루트 아래의 프로젝트 id -> {name, path} 색인
//! - 프로젝트 디렉토리 전체를 `<디렉토리 이름>.zip`으로 묶어 내보내기

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::commands::project::ProjectStore;
use crate::config::AppConfig;
use crate::db::{DB_FILE_NAME, DEFAULT_BUSY_TIMEOUT};
use crate::error::{DalError, Result};
use crate::models::ProjectInfo;
use crate::utils::{ensure_within, read_json, sanitize_name, write_json_atomic};

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    name: String,
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

/// 프로젝트 루트 아래의 프로젝트 색인
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    projects_root: PathBuf,
    busy_timeout: Duration,
}

impl ProjectRegistry {
    pub fn new(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            projects_root: config.projects_root.clone(),
            busy_timeout: config.busy_timeout,
        }
    }

    fn index_path(&self) -> Result<PathBuf> {
        ensure_within(&self.projects_root, &self.projects_root.join(INDEX_FILE))
    }

    fn load_index(&self) -> Result<BTreeMap<String, IndexEntry>> {
        let path = self.index_path()?;
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        read_json(&path)
    }

    fn save_index(&self, index: &BTreeMap<String, IndexEntry>) -> Result<()> {
        write_json_atomic(&self.index_path()?, index)
    }

    /// `<정리된 이름>_<uuid>` 디렉토리에 프로젝트 생성 후 색인에 등록
    pub fn create_project(&self, name: &str, description: Option<&str>) -> Result<ProjectInfo> {
        if name.trim().is_empty() {
            return Err(DalError::InvalidInput("project name is empty".to_string()));
        }
        std::fs::create_dir_all(&self.projects_root)?;

        let project_id = Uuid::new_v4().to_string();
        let dir = self
            .projects_root
            .join(format!("{}_{}", sanitize_name(name), project_id));
        let dir = ensure_within(&self.projects_root, &dir)?;
        let project = ProjectStore::create(&dir, name, description)?;

        let path = project.root().display().to_string();
        let mut index = self.load_index()?;
        index.insert(
            project_id.clone(),
            IndexEntry {
                name: name.to_string(),
                path: path.clone(),
                description: description.map(str::to_string),
            },
        );
        self.save_index(&index)?;

        Ok(ProjectInfo {
            project_id,
            name: name.to_string(),
            description: description.map(str::to_string),
            path,
        })
    }

    /// 등록된 프로젝트 목록 (이름 순)
    pub fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        let mut projects: Vec<ProjectInfo> = self
            .load_index()?
            .into_iter()
            .map(|(project_id, entry)| ProjectInfo {
                project_id,
                name: entry.name,
                description: entry.description,
                path: entry.path,
            })
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.project_id.cmp(&b.project_id)));
        Ok(projects)
    }

    /// 프로젝트 id -> 프로젝트 핸들. 색인의 경로가 프로젝트 루트 밖이면 `PathEscape`
    pub fn resolve(&self, project_id: &str) -> Result<ProjectStore> {
        let index = self.load_index()?;
        let entry = index
            .get(project_id)
            .ok_or_else(|| DalError::ProjectNotFound(project_id.to_string()))?;
        let dir = ensure_within(&self.projects_root, Path::new(&entry.path))?;
        if !dir.is_dir() {
            return Err(DalError::ProjectNotFound(project_id.to_string()));
        }
        Ok(ProjectStore::new(dir).with_busy_timeout(self.busy_timeout))
    }
}

// ============================================
// Export
// ============================================

/// 심볼릭 링크는 따라가지 않음
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), out)?;
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// 프로젝트 디렉토리 전체를 `<디렉토리 이름>.zip`으로 내보내고 경로를 반환합니다.
///
/// 테이블 저장소 파일은 백업 API로 만든 스냅샷을 넣습니다. 이전 번들은 포함하지 않습니다.
pub fn export_bundle(project: &ProjectStore) -> Result<PathBuf> {
    let root = ensure_within(project.root(), project.root())?;
    let dir_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DalError::InvalidInput("project root has no directory name".to_string()))?;
    let bundle_path = ensure_within(&root, &root.join(format!("{}.zip", dir_name)))?;

    let mut files = Vec::new();
    collect_files(&root, &mut files)?;
    files.retain(|p| p != &bundle_path);
    files.sort();

    let nonce = Uuid::new_v4();
    let snapshot_path = root.join(format!(".{}.snapshot", nonce));
    let tmp_path = root.join(format!(".{}.zip.tmp", nonce));

    let result = project
        .tables()
        .snapshot_to(&snapshot_path)
        .and_then(|_| write_bundle(&root, &files, &snapshot_path, &tmp_path))
        .and_then(|count| {
            std::fs::rename(&tmp_path, &bundle_path)?;
            Ok(count)
        });
    let _ = std::fs::remove_file(&snapshot_path);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    let count = result?;

    info!(path = %bundle_path.display(), files = count, "project exported");
    Ok(bundle_path)
}

fn write_bundle(root: &Path, files: &[PathBuf], snapshot: &Path, out_path: &Path) -> Result<usize> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut archive = ZipWriter::new(File::create(out_path)?);
    let mut count = 0;

    for path in files {
        let relative = path.strip_prefix(root).map_err(|_| {
            DalError::PathEscape(path.display().to_string())
        })?;
        let name = archive_name(relative);
        // 저널/WAL 파일은 스냅샷에 이미 반영됨
        if name.starts_with(&format!("{}-", DB_FILE_NAME)) {
            continue;
        }
        let source = if name == DB_FILE_NAME { snapshot } else { path.as_path() };

        archive.start_file(name, options)?;
        std::io::copy(&mut File::open(source)?, &mut archive)?;
        count += 1;
    }

    archive.finish()?;
    Ok(count)
}
