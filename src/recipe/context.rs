//! 레시피에 주입되는 기능 집합
//!
//! 레시피는 이 객체를 통해서만 저장소에 접근합니다. 파일/네트워크/프로세스 기능은 없습니다.

use serde_json::{Map, Value};
use tracing::debug;

use crate::db::{Table, TableStore};
use crate::error::{DalError, Result};
use crate::utils::sanitize_name;

/// `save_timeseries`의 기본 시간 열
pub const DEFAULT_TIME_COLUMN: &str = "ts";

/// 한 번의 레시피 실행에 묶인 기능 객체
pub struct RecipeContext<'a> {
    store: &'a TableStore,
    params: &'a Map<String, Value>,
    logs: Vec<String>,
    outputs: Vec<String>,
}

impl<'a> RecipeContext<'a> {
    pub(crate) fn new(store: &'a TableStore, params: &'a Map<String, Value>) -> Self {
        Self {
            store,
            params,
            logs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// 테이블 읽기
    pub fn load(&self, table_name: &str) -> Result<Table> {
        self.store.load_table(table_name)
    }

    /// 임의 읽기 쿼리. 레시피 파라미터는 `:name`으로 바인딩됩니다.
    pub fn query_duckdb(&self, sql: &str) -> Result<Table> {
        self.store.run_query_with(sql, self.params)
    }

    /// 이름을 정리해 저장하고 출력으로 기록합니다. 저장된 이름을 반환합니다.
    pub fn save_table(&mut self, name: &str, data: &Table) -> Result<String> {
        let table_name = sanitize_name(name);
        self.store.save_table(&table_name, data)?;
        self.outputs.push(table_name.clone());
        Ok(table_name)
    }

    /// `time_column`이 없으면 아무것도 만들지 않고 실패합니다.
    pub fn save_timeseries(
        &mut self,
        name: &str,
        data: &Table,
        time_column: Option<&str>,
    ) -> Result<String> {
        let time_column = time_column.unwrap_or(DEFAULT_TIME_COLUMN);
        if !data.has_column(time_column) {
            return Err(DalError::MissingColumn {
                table: sanitize_name(name),
                column: time_column.to_string(),
            });
        }
        self.save_table(name, data)
    }

    /// 실행 로그에 추가 (실행 종료 시에만 기록됨)
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(message = %message, "recipe log");
        self.logs.push(message);
    }

    /// 시각화는 UI 담당. 로그만 남깁니다.
    pub fn plot_timeseries(&mut self) {
        self.log("plot_timeseries called (UI handles visualization)");
    }

    pub fn add_event_markers(&mut self) {
        self.log("add_event_markers called (UI handles visualization)");
    }

    pub fn params(&self) -> &Map<String, Value> {
        self.params
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<String>) {
        (self.logs, self.outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CellValue;
    use tempfile::tempdir;

    fn values() -> Table {
        Table::new(vec!["value".into()], vec![vec![CellValue::Integer(1)]]).unwrap()
    }

    #[test]
    fn test_save_table_sanitizes_and_records_order() {
        let dir = tempdir().unwrap();
        let store = TableStore::new(dir.path());
        store.initialize().unwrap();
        let params = Map::new();
        let mut ctx = RecipeContext::new(&store, &params);

        assert_eq!(ctx.save_table("daily report", &values()).unwrap(), "daily_report");
        assert_eq!(ctx.save_table("b", &values()).unwrap(), "b");
        assert_eq!(ctx.outputs(), &["daily_report".to_string(), "b".to_string()]);
        assert!(store.has_table("daily_report").unwrap());
    }

    #[test]
    fn test_save_timeseries_requires_time_column() {
        let dir = tempdir().unwrap();
        let store = TableStore::new(dir.path());
        store.initialize().unwrap();
        let params = Map::new();
        let mut ctx = RecipeContext::new(&store, &params);

        let err = ctx.save_timeseries("y", &values(), None).unwrap_err();
        assert!(matches!(err, DalError::MissingColumn { ref column, .. } if column == "ts"));
        assert!(!store.has_table("y").unwrap());
        assert!(ctx.outputs().is_empty());

        // 다른 시간 열 이름 지정
        assert_eq!(ctx.save_timeseries("y", &values(), Some("value")).unwrap(), "y");
    }

    #[test]
    fn test_visualization_calls_only_log() {
        let dir = tempdir().unwrap();
        let store = TableStore::new(dir.path());
        store.initialize().unwrap();
        let params = Map::new();
        let mut ctx = RecipeContext::new(&store, &params);

        ctx.plot_timeseries();
        ctx.add_event_markers();
        assert_eq!(ctx.logs().len(), 2);
        assert!(store.list_tables().unwrap().is_empty());
    }
}
