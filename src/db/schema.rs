//! Table Schema
//!
//! 저장 시점에 데이터로부터 SQLite 스키마를 추론하고 DDL/DML을 생성합니다.

use super::table::{CellValue, Table};

/// 추론된 열 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    /// 값이 모두 NULL인 열 (타입 선언 없음)
    Untyped,
}

impl ColumnType {
    pub fn as_sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Untyped => "",
        }
    }

    fn widen(self, value: &CellValue) -> ColumnType {
        match (self, value) {
            (current, CellValue::Null) => current,
            (ColumnType::Text, _) | (_, CellValue::Text(_)) => ColumnType::Text,
            (ColumnType::Untyped | ColumnType::Integer, CellValue::Integer(_)) => ColumnType::Integer,
            (_, CellValue::Integer(_) | CellValue::Real(_)) => ColumnType::Real,
        }
    }
}

/// 열별 타입 추론
pub fn infer_column_types(table: &Table) -> Vec<ColumnType> {
    let mut types = vec![ColumnType::Untyped; table.columns().len()];
    for row in table.rows() {
        for (ty, value) in types.iter_mut().zip(row) {
            *ty = ty.widen(value);
        }
    }
    types
}

/// SQL 식별자 인용 (`"` 이스케이프)
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// 기존 테이블을 지우고 새 스키마로 다시 만드는 배치 SQL
pub fn replace_table_sql(name: &str, table: &Table) -> String {
    let quoted = quote_ident(name);
    let columns = table
        .columns()
        .iter()
        .zip(infer_column_types(table))
        .map(|(column, ty)| match ty {
            ColumnType::Untyped => quote_ident(column),
            _ => format!("{} {}", quote_ident(column), ty.as_sql()),
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "DROP TABLE IF EXISTS {quoted};\nCREATE TABLE {quoted} ({columns});",
        quoted = quoted,
        columns = columns
    )
}

/// 행 삽입 SQL (`?1, ?2, …`)
pub fn insert_sql(name: &str, table: &Table) -> String {
    let columns = table
        .columns()
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=table.columns().len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(name),
        columns,
        placeholders
    )
}

/// 사용자 테이블 목록 조회 SQL
pub const LIST_TABLES: &str = r#"
SELECT name FROM sqlite_master
WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
ORDER BY name
"#;

/// 단일 테이블 존재 여부 조회 SQL (SQLite 식별자처럼 대소문자 무시)
pub const TABLE_EXISTS: &str =
    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE";
