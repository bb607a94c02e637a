//! Project Metadata Store
//!
//! 프로젝트 디렉토리당 `metadata.json` 문서 하나를 통째로 읽고 씁니다.
//! 갱신은 read-modify-write이며 마지막 writer가 이깁니다. (동시 writer는 갱신을 잃을 수 있음)

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::db::{TableStore, DEFAULT_BUSY_TIMEOUT};
use crate::error::{DalError, Result};
use crate::models::{ConnectionDescriptor, MetadataRecord};
use crate::utils::{ensure_within, read_json, write_json_atomic};

pub const METADATA_FILE: &str = "metadata.json";

/// 프로젝트 디렉토리 핸들
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
    busy_timeout: Duration,
}

impl ProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// 디렉토리(상위 포함) + 빈 테이블 저장소 + 초기 메타데이터 생성
    pub fn create(root: impl Into<PathBuf>, name: &str, description: Option<&str>) -> Result<Self> {
        let store = Self::new(root);
        std::fs::create_dir_all(&store.root)?;
        store.tables().initialize()?;
        store.save(&MetadataRecord::new(name, description))?;

        info!(project = name, root = %store.root.display(), "project created");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 이 프로젝트의 테이블 저장소
    pub fn tables(&self) -> TableStore {
        TableStore::new(&self.root).with_busy_timeout(self.busy_timeout)
    }

    fn metadata_path(&self) -> Result<PathBuf> {
        ensure_within(&self.root, &self.root.join(METADATA_FILE))
    }

    /// 메타데이터 전체 로드
    pub fn load(&self) -> Result<MetadataRecord> {
        let path = self.metadata_path()?;
        if !path.exists() {
            return Err(DalError::ProjectNotFound(self.root.display().to_string()));
        }
        read_json(&path)
    }

    /// 메타데이터 전체 덮어쓰기 (병합 없음)
    pub fn save(&self, record: &MetadataRecord) -> Result<()> {
        write_json_atomic(&self.metadata_path()?, record)
    }

    /// 데이터셋 이름 등록 (정렬 + 중복 제거 유지)
    pub fn register_dataset(&self, name: &str) -> Result<MetadataRecord> {
        let mut record = self.load()?;
        record.datasets.push(name.to_string());
        record.datasets.sort();
        record.datasets.dedup();
        self.save(&record)?;
        Ok(record)
    }

    /// 연결 정보 저장 (같은 이름은 교체)
    pub fn save_connection(&self, descriptor: &ConnectionDescriptor) -> Result<()> {
        if descriptor.name.trim().is_empty() {
            return Err(DalError::InvalidInput("connection name is empty".to_string()));
        }
        let mut record = self.load()?;
        record
            .connections
            .insert(descriptor.name.clone(), descriptor.clone());
        self.save(&record)?;

        info!(connection = %descriptor.name, "connection saved");
        Ok(())
    }

    /// 연결 정보 조회
    pub fn get_connection(&self, name: &str) -> Result<ConnectionDescriptor> {
        let record = self.load()?;
        let mut descriptor = record
            .connections
            .get(name)
            .cloned()
            .ok_or_else(|| DalError::ConnectionNotFound(name.to_string()))?;
        // 문서의 키가 이름의 원본
        descriptor.name = name.to_string();
        Ok(descriptor)
    }
}
