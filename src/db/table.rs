//! 메모리 내 테이블 표현
//!
//! 저장소와 레시피 사이에서 주고받는 데이터 단위입니다.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{DalError, Result};

/// 셀 값
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Real(f) => Some(*f),
            _ => None,
        }
    }

    /// JSON 값 변환 (레시피 파라미터/리터럴용)
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Integer(i),
                None => n.as_f64().map(CellValue::Real).unwrap_or(CellValue::Null),
            },
            serde_json::Value::String(s) => CellValue::Text(s.clone()),
            other => CellValue::Text(other.to_string()),
        }
    }

    /// SQL 비교 규칙: NULL은 어떤 값과도 비교 불가, 숫자끼리/문자열끼리만 비교
    pub fn compare(&self, other: &CellValue) -> Option<Ordering> {
        match (self, other) {
            (CellValue::Text(a), CellValue::Text(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// 정렬용 전순서: NULL < 숫자 < 문자열
    pub fn sort_cmp(&self, other: &CellValue) -> Ordering {
        fn rank(v: &CellValue) -> u8 {
            match v {
                CellValue::Null => 0,
                CellValue::Integer(_) | CellValue::Real(_) => 1,
                CellValue::Text(_) => 2,
            }
        }
        self.compare(other)
            .unwrap_or_else(|| rank(self).cmp(&rank(other)))
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Real(r) => write!(f, "{}", r),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Integer(i),
            ValueRef::Real(f) => CellValue::Real(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                CellValue::Text(String::from_utf8_lossy(t).into_owned())
            }
        }
    }
}

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            CellValue::Null => ToSqlOutput::Owned(Value::Null),
            CellValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            CellValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            CellValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// 이름이 붙은 열 + 행 집합
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// 열 이름 중복/행 너비 불일치를 검증하며 생성
    ///
    /// SQLite 열 이름은 대소문자를 구분하지 않으므로 `a`와 `A`도 중복입니다.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.to_ascii_lowercase()) {
                return Err(DalError::InvalidInput(format!("duplicate column: {}", column)));
            }
        }
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(DalError::InvalidInput(format!(
                "row {} has {} cells, expected {}",
                index,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| DalError::MissingColumn {
            table: String::new(),
            column: name.to_string(),
        })
    }

    /// 한 열의 값들
    pub fn column_values(&self, name: &str) -> Result<Vec<&CellValue>> {
        let index = self.require_column(name)?;
        Ok(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// 조건을 만족하는 행만 남긴 새 테이블
    pub fn filter_rows<F>(&self, column: &str, mut keep: F) -> Result<Table>
    where
        F: FnMut(&CellValue) -> bool,
    {
        let index = self.require_column(column)?;
        let rows = self
            .rows
            .iter()
            .filter(|row| keep(&row[index]))
            .cloned()
            .collect();
        Ok(Table { columns: self.columns.clone(), rows })
    }

    /// 안정 정렬
    pub fn sorted_by(&self, column: &str, descending: bool) -> Result<Table> {
        let index = self.require_column(column)?;
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            let ord = a[index].sort_cmp(&b[index]);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(Table { columns: self.columns.clone(), rows })
    }

    /// 지정한 열만 지정한 순서로
    pub fn select(&self, columns: &[String]) -> Result<Table> {
        let indexes = columns
            .iter()
            .map(|c| self.require_column(c))
            .collect::<Result<Vec<_>>>()?;
        let rows = self
            .rows
            .iter()
            .map(|row| indexes.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Table::new(columns.to_vec(), rows)
    }

    /// 열 추가 (같은 이름이 있으면 교체)
    pub fn with_column(&self, name: &str, values: Vec<CellValue>) -> Result<Table> {
        if values.len() != self.rows.len() {
            return Err(DalError::InvalidInput(format!(
                "column '{}' has {} values, table has {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }

        let mut table = self.clone();
        match table.column_index(name) {
            Some(index) => {
                for (row, value) in table.rows.iter_mut().zip(values) {
                    row[index] = value;
                }
            }
            None => {
                let folded = name.to_ascii_lowercase();
                if let Some(existing) = table.columns.iter().find(|c| c.to_ascii_lowercase() == folded) {
                    return Err(DalError::InvalidInput(format!(
                        "column '{}' conflicts with existing column '{}'",
                        name, existing
                    )));
                }
                table.columns.push(name.to_string());
                for (row, value) in table.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(table)
    }
}

/// 파일 헤더용: 공백을 잘라낸 뒤 중복/빈 열 이름을 고유하게 만듭니다.
/// (`value`, `value.1`, `Unnamed: 2` …)
pub fn unique_column_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    dedupe_column_names(names, true)
}

/// 쿼리 결과용: 이름은 그대로 두고 빈 이름과 중복만 고칩니다.
pub fn result_column_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    dedupe_column_names(names, false)
}

// 중복 판정은 대소문자 무시 (SQLite 열 이름 규칙)
fn dedupe_column_names<I, S>(names: I, trim: bool) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for (index, raw) in names.into_iter().enumerate() {
        let raw = raw.as_ref();
        let name = if trim { raw.trim() } else { raw };
        let base = if name.trim().is_empty() {
            format!("Unnamed: {}", index)
        } else {
            name.to_string()
        };

        let mut candidate = base.clone();
        let mut suffix = 1;
        while !seen.insert(candidate.to_ascii_lowercase()) {
            candidate = format!("{}.{}", base, suffix);
            suffix += 1;
        }
        out.push(candidate);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(
            vec!["ts".to_string(), "value".to_string()],
            vec![
                vec![CellValue::Text("2024-01-01T00:00:01Z".into()), CellValue::Integer(2)],
                vec![CellValue::Text("2024-01-01T00:00:00Z".into()), CellValue::Integer(1)],
                vec![CellValue::Text("2024-01-01T00:00:02Z".into()), CellValue::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let err = Table::new(vec!["a".into()], vec![vec![]]).unwrap_err();
        assert!(matches!(err, DalError::InvalidInput(_)));
    }

    #[test]
    fn test_new_rejects_duplicate_columns() {
        let err = Table::new(vec!["a".into(), "a".into()], vec![]).unwrap_err();
        assert!(matches!(err, DalError::InvalidInput(_)));
        let err = Table::new(vec!["a".into(), "A".into()], vec![]).unwrap_err();
        assert!(matches!(err, DalError::InvalidInput(_)));
    }

    #[test]
    fn test_with_column_rejects_case_clash() {
        let err = sample()
            .with_column("Value", vec![CellValue::Null; 3])
            .unwrap_err();
        assert!(matches!(err, DalError::InvalidInput(_)));
    }

    #[test]
    fn test_filter_skips_nulls() {
        let filtered = sample()
            .filter_rows("value", |v| v.compare(&CellValue::Integer(0)) == Some(Ordering::Greater))
            .unwrap();
        assert_eq!(filtered.row_count(), 2);
    }

    #[test]
    fn test_sort_puts_nulls_first() {
        let sorted = sample().sorted_by("value", false).unwrap();
        let values: Vec<_> = sorted.column_values("value").unwrap().into_iter().cloned().collect();
        assert_eq!(values, vec![CellValue::Null, CellValue::Integer(1), CellValue::Integer(2)]);
    }

    #[test]
    fn test_with_column_replaces_existing() {
        let table = sample()
            .with_column("value", vec![CellValue::Integer(9); 3])
            .unwrap();
        assert_eq!(table.columns(), &["ts".to_string(), "value".to_string()]);
        assert!(table.rows().iter().all(|r| r[1] == CellValue::Integer(9)));
    }

    #[test]
    fn test_missing_column_is_reported() {
        let err = sample().select(&["nope".to_string()]).unwrap_err();
        assert!(matches!(err, DalError::MissingColumn { .. }));
    }

    #[test]
    fn test_unique_column_names() {
        let names = unique_column_names(["value", "value", "", " ts "]);
        assert_eq!(names, vec!["value", "value.1", "Unnamed: 2", "ts"]);

        let names = unique_column_names(["Value", "value", "VALUE"]);
        assert_eq!(names, vec!["Value", "value.1", "VALUE.2"]);
    }

    #[test]
    fn test_result_column_names_keep_whitespace() {
        let names = result_column_names([" ts ", "value", "Value", ""]);
        assert_eq!(names, vec![" ts ", "value", "Value.1", "Unnamed: 3"]);
    }

    #[test]
    fn test_cell_value_json_shape() {
        let json = serde_json::to_string(&vec![
            CellValue::Null,
            CellValue::Integer(1),
            CellValue::Real(1.5),
            CellValue::Text("x".into()),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,1,1.5,"x"]"#);
    }
}
