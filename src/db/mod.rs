//! Table Store
//!
//! 프로젝트당 SQLite 파일 하나에 이름 있는 테이블을 저장합니다.
//! 모든 연산은 자신만의 연결을 열고 반환 전에 닫습니다. (풀링 없음)

mod schema;
mod table;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags, Statement};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info};

use crate::error::{DalError, Result};
use crate::utils::ensure_within;

pub use schema::{infer_column_types, quote_ident, ColumnType};
pub use table::{result_column_names, unique_column_names, CellValue, Table};

/// 프로젝트 디렉토리 안의 저장소 파일 이름
pub const DB_FILE_NAME: &str = "project.db";

/// 기본 busy timeout
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// 프로젝트 테이블 저장소
#[derive(Debug, Clone)]
pub struct TableStore {
    root: PathBuf,
    busy_timeout: Duration,
}

impl TableStore {
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

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 저장소 파일 경로 (프로젝트 루트 밖이면 거부)
    pub fn db_path(&self) -> Result<PathBuf> {
        ensure_within(&self.root, &self.root.join(DB_FILE_NAME))
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(self.db_path()?)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn open_readonly(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            self.db_path()?,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    /// 빈 저장소 파일 생성
    pub fn initialize(&self) -> Result<()> {
        let conn = self.open()?;
        // 빈 파일도 유효한 SQLite 헤더를 갖도록 강제
        conn.execute_batch("PRAGMA user_version = 1;")?;
        Ok(())
    }

    /// 같은 이름의 테이블(스키마 포함)을 `data`로 교체
    pub fn save_table(&self, name: &str, data: &Table) -> Result<()> {
        if data.columns().is_empty() {
            return Err(DalError::InvalidInput(format!(
                "table '{}' has no columns",
                name
            )));
        }

        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute_batch(&schema::replace_table_sql(name, data))?;
        {
            let mut stmt = tx.prepare(&schema::insert_sql(name, data))?;
            for row in data.rows() {
                stmt.execute(rusqlite::params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;

        info!(
            table = name,
            rows = data.row_count(),
            columns = data.columns().len(),
            "table saved"
        );
        Ok(())
    }

    /// 테이블 존재 여부
    pub fn has_table(&self, name: &str) -> Result<bool> {
        let conn = self.open_readonly()?;
        Self::table_exists(&conn, name)
    }

    fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
        let mut stmt = conn.prepare(schema::TABLE_EXISTS)?;
        Ok(stmt.exists([name])?)
    }

    /// 테이블 전체 로드
    pub fn load_table(&self, name: &str) -> Result<Table> {
        let conn = self.open_readonly()?;
        if !Self::table_exists(&conn, name)? {
            return Err(DalError::TableNotFound(name.to_string()));
        }
        let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(name)))?;
        collect_rows(&mut stmt)
    }

    /// 사용자 테이블 이름 목록 (오름차순)
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.open_readonly()?;
        let mut stmt = conn.prepare(schema::LIST_TABLES)?;
        let iter = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for name in iter {
            names.push(name?);
        }
        Ok(names)
    }

    /// 임의 읽기 쿼리 실행 (SQL은 해석하지 않고 그대로 전달)
    pub fn run_query(&self, sql: &str) -> Result<Table> {
        self.run_query_with(sql, &Map::new())
    }

    /// 이름 있는 파라미터(`:name`, `@name`, `$name`)를 `params`에서 바인딩하여 실행
    pub fn run_query_with(&self, sql: &str, params: &Map<String, JsonValue>) -> Result<Table> {
        let conn = self.open_readonly()?;
        let mut stmt = conn.prepare(sql)?;

        for index in 1..=stmt.parameter_count() {
            let key = stmt
                .parameter_name(index)
                .map(|raw| raw[1..].to_string())
                .ok_or_else(|| {
                    DalError::InvalidInput(format!(
                        "positional parameter ?{} cannot be bound; use a named parameter",
                        index
                    ))
                })?;
            let value = params.get(&key).ok_or_else(|| {
                DalError::InvalidInput(format!("query parameter '{}' not supplied", key))
            })?;
            stmt.raw_bind_parameter(index, CellValue::from_json(value))?;
        }

        debug!(sql, "running query");
        collect_bound_rows(&mut stmt)
    }

    /// 현재 저장소를 다른 파일로 온라인 백업 (내보내기용 일관 스냅샷)
    pub fn snapshot_to(&self, out_path: &Path) -> Result<()> {
        let src = self.open_readonly()?;
        let mut out_conn = Connection::open(out_path)?;
        let backup = Backup::new(&src, &mut out_conn)?;
        backup.run_to_completion(5, Duration::from_millis(10), None)?;
        Ok(())
    }
}

fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    result_column_names(stmt.column_names())
}

fn collect_rows(stmt: &mut Statement<'_>) -> Result<Table> {
    let columns = column_names(stmt);
    let mut rows = stmt.query([])?;
    read_all(&mut rows, columns)
}

fn collect_bound_rows(stmt: &mut Statement<'_>) -> Result<Table> {
    let columns = column_names(stmt);
    let mut rows = stmt.raw_query();
    read_all(&mut rows, columns)
}

fn read_all(rows: &mut rusqlite::Rows<'_>, columns: Vec<String>) -> Result<Table> {
    let width = columns.len();
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(width);
        for index in 0..width {
            record.push(CellValue::from(row.get_ref(index)?));
        }
        records.push(record);
    }
    Table::new(columns, records)
}
