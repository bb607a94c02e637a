//! 선언형 레시피 문서
//!
//! 레시피 디렉토리의 `.json` 문서는 단계(step) 목록이며, 각 단계는 [`RecipeContext`]의
//! 기능 또는 메모리 내 테이블 변환 하나에 대응합니다. 임의 코드를 실행하지 않습니다.
//!
//! ```json
//! {
//!   "description": "value > threshold 인 행 저장",
//!   "steps": [
//!     { "op": "load", "table": "sensor_data", "as": "sensor" },
//!     { "op": "filter", "input": "sensor", "column": "value", "cmp": "gt",
//!       "value": { "param": "threshold", "default": 1 }, "as": "outliers" },
//!     { "op": "save_table", "input": "outliers", "name": "outliers" },
//!     { "op": "log", "message": "saved {rows:outliers} rows" }
//!   ]
//! }
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::context::RecipeContext;
use super::RecipeScript;
use crate::db::{CellValue, Table};
use crate::error::{DalError, Result};
use crate::utils::read_json;

/// 레시피 문서 최상위
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeDocument {
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<Step>,
}

/// 리터럴 값 또는 레시피 파라미터 참조
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Param {
        param: String,
        #[serde(default)]
        default: Option<Value>,
    },
    Literal(Value),
}

impl Operand {
    fn resolve(&self, params: &Map<String, Value>) -> Result<Value> {
        match self {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Param { param, default } => params
                .get(param)
                .or(default.as_ref())
                .cloned()
                .ok_or_else(|| {
                    DalError::InvalidInput(format!("recipe parameter '{}' not supplied", param))
                }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Comparison {
    /// NULL이나 비교 불가능한 값은 항상 false
    fn matches(self, left: &CellValue, right: &CellValue) -> bool {
        let Some(ord) = left.compare(right) else {
            return false;
        };
        match self {
            Comparison::Gt => ord == Ordering::Greater,
            Comparison::Ge => ord != Ordering::Less,
            Comparison::Lt => ord == Ordering::Less,
            Comparison::Le => ord != Ordering::Greater,
            Comparison::Eq => ord == Ordering::Equal,
            Comparison::Ne => ord != Ordering::Equal,
        }
    }
}

/// 레시피 단계
///
/// `as`가 없는 변환 단계는 입력 프레임을 덮어씁니다.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Load {
        table: String,
        #[serde(rename = "as")]
        into: String,
    },
    Query {
        sql: String,
        #[serde(rename = "as")]
        into: String,
    },
    Filter {
        input: String,
        column: String,
        cmp: Comparison,
        value: Operand,
        #[serde(rename = "as")]
        into: Option<String>,
    },
    Sort {
        input: String,
        by: String,
        #[serde(default)]
        descending: bool,
        #[serde(rename = "as")]
        into: Option<String>,
    },
    Select {
        input: String,
        columns: Vec<String>,
        #[serde(rename = "as")]
        into: Option<String>,
    },
    Assign {
        input: String,
        column: String,
        value: Operand,
        #[serde(rename = "as")]
        into: Option<String>,
    },
    /// `rolling_mean`, `rolling_std` 열 추가 (min_periods = 1, 표본 표준편차, 값이 하나면 0).
    /// `threshold`가 있으면 `zscore`, `is_outlier`(0/1)도 추가합니다.
    Rolling {
        input: String,
        column: String,
        window: Operand,
        #[serde(default)]
        threshold: Option<Operand>,
        #[serde(rename = "as")]
        into: Option<String>,
    },
    /// `left`의 각 행에 `on` 값이 가장 가까운 `right` 행을 붙입니다. (left join)
    ///
    /// `on`은 숫자(초) 또는 ISO 8601 타임스탬프. `tolerance`(초)보다 멀면 매칭하지 않습니다.
    /// 겹치는 열 이름에는 `suffixes`를 붙입니다.
    Join {
        left: String,
        right: String,
        #[serde(default = "default_join_key")]
        on: String,
        #[serde(default)]
        tolerance: Option<Operand>,
        #[serde(default = "default_suffixes")]
        suffixes: [String; 2],
        #[serde(rename = "as")]
        into: String,
    },
    SaveTable {
        input: String,
        name: String,
    },
    SaveTimeseries {
        input: String,
        name: String,
        #[serde(default)]
        time_column: Option<String>,
    },
    Log {
        message: String,
    },
    PlotTimeseries {},
    AddEventMarkers {},
    Fail {
        message: String,
    },
}

impl Step {
    fn op_name(&self) -> &'static str {
        match self {
            Step::Load { .. } => "load",
            Step::Query { .. } => "query",
            Step::Filter { .. } => "filter",
            Step::Sort { .. } => "sort",
            Step::Select { .. } => "select",
            Step::Assign { .. } => "assign",
            Step::Rolling { .. } => "rolling",
            Step::Join { .. } => "join",
            Step::SaveTable { .. } => "save_table",
            Step::SaveTimeseries { .. } => "save_timeseries",
            Step::Log { .. } => "log",
            Step::PlotTimeseries {} => "plot_timeseries",
            Step::AddEventMarkers {} => "add_event_markers",
            Step::Fail { .. } => "fail",
        }
    }
}

fn default_join_key() -> String {
    "ts".to_string()
}

fn default_suffixes() -> [String; 2] {
    ["_x".to_string(), "_y".to_string()]
}

/// 단계 사이에서 공유되는 이름 있는 테이블들
#[derive(Default)]
struct Frames(HashMap<String, Table>);

impl Frames {
    fn get(&self, name: &str) -> Result<&Table> {
        self.0
            .get(name)
            .ok_or_else(|| DalError::InvalidInput(format!("unknown frame '{}'", name)))
    }

    fn put(&mut self, input: &str, into: &Option<String>, table: Table) {
        let name = into.as_deref().unwrap_or(input);
        self.0.insert(name.to_string(), table);
    }
}

impl RecipeDocument {
    pub fn from_file(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    fn apply(&self, step: &Step, ctx: &mut RecipeContext<'_>, frames: &mut Frames) -> Result<()> {
        match step {
            Step::Load { table, into } => {
                let data = ctx.load(table)?;
                frames.0.insert(into.clone(), data);
            }
            Step::Query { sql, into } => {
                let data = ctx.query_duckdb(sql)?;
                frames.0.insert(into.clone(), data);
            }
            Step::Filter { input, column, cmp, value, into } => {
                let right = CellValue::from_json(&value.resolve(ctx.params())?);
                let filtered = frames
                    .get(input)?
                    .filter_rows(column, |left| cmp.matches(left, &right))?;
                frames.put(input, into, filtered);
            }
            Step::Sort { input, by, descending, into } => {
                let sorted = frames.get(input)?.sorted_by(by, *descending)?;
                frames.put(input, into, sorted);
            }
            Step::Select { input, columns, into } => {
                let selected = frames.get(input)?.select(columns)?;
                frames.put(input, into, selected);
            }
            Step::Assign { input, column, value, into } => {
                let cell = CellValue::from_json(&value.resolve(ctx.params())?);
                let source = frames.get(input)?;
                let assigned = source.with_column(column, vec![cell; source.row_count()])?;
                frames.put(input, into, assigned);
            }
            Step::Rolling { input, column, window, threshold, into } => {
                let window = value_as_window(&window.resolve(ctx.params())?)?;
                let mut rolled = rolling_stats(frames.get(input)?, column, window)?;
                if let Some(threshold) = threshold {
                    let threshold = value_as_threshold(&threshold.resolve(ctx.params())?)?;
                    rolled = flag_outliers(&rolled, column, threshold)?;
                }
                frames.put(input, into, rolled);
            }
            Step::Join { left, right, on, tolerance, suffixes, into } => {
                let tolerance = match tolerance {
                    Some(operand) => Some(value_as_tolerance(&operand.resolve(ctx.params())?)?),
                    None => None,
                };
                let joined = join_nearest(frames.get(left)?, frames.get(right)?, on, tolerance, suffixes)?;
                frames.0.insert(into.clone(), joined);
            }
            Step::SaveTable { input, name } => {
                let data = frames.get(input)?;
                ctx.save_table(name, data)?;
            }
            Step::SaveTimeseries { input, name, time_column } => {
                let data = frames.get(input)?;
                ctx.save_timeseries(name, data, time_column.as_deref())?;
            }
            Step::Log { message } => {
                let rendered = render_message(message, frames, ctx.params())?;
                ctx.log(rendered);
            }
            Step::PlotTimeseries {} => ctx.plot_timeseries(),
            Step::AddEventMarkers {} => ctx.add_event_markers(),
            Step::Fail { message } => {
                let rendered = render_message(message, frames, ctx.params())?;
                return Err(DalError::RecipeFailure(rendered));
            }
        }
        Ok(())
    }
}

impl RecipeScript for RecipeDocument {
    fn execute(&self, ctx: &mut RecipeContext<'_>) -> Result<()> {
        let mut frames = Frames::default();
        for (index, step) in self.steps.iter().enumerate() {
            if let Err(e) = self.apply(step, ctx, &mut frames) {
                ctx.log(format!("step {} ({}) failed", index + 1, step.op_name()));
                return Err(e);
            }
        }
        Ok(())
    }
}

fn value_as_window(value: &Value) -> Result<usize> {
    value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64)
                .map(|f| f as u64)
        })
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|w| *w >= 1)
        .map(|w| w as usize)
        .ok_or_else(|| DalError::InvalidInput(format!("invalid rolling window: {}", value)))
}

fn value_as_threshold(value: &Value) -> Result<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|t| t.is_finite())
        .ok_or_else(|| DalError::InvalidInput(format!("invalid outlier threshold: {}", value)))
}

fn value_as_tolerance(value: &Value) -> Result<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|t| t.is_finite() && *t >= 0.0)
        .ok_or_else(|| DalError::InvalidInput(format!("invalid join tolerance: {}", value)))
}

/// 조인 키 -> 초 단위 값. 숫자는 그대로, 문자열은 타임스탬프로 해석
fn time_key(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Integer(_) | CellValue::Real(_) => cell.as_f64().filter(|v| v.is_finite()),
        CellValue::Text(s) => parse_timestamp(s),
        CellValue::Null => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let micros = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        dt.timestamp_micros()
    } else if let Some(dt) = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        dt.and_utc().timestamp_micros()
    } else if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_micros()
    } else {
        return raw.parse::<f64>().ok().filter(|v| v.is_finite());
    };
    Some(micros as f64 / 1_000_000.0)
}

/// nearest asof 조인. 거리가 같으면 앞쪽(작은 키) 행을 고릅니다.
fn join_nearest(
    left: &Table,
    right: &Table,
    on: &str,
    tolerance: Option<f64>,
    suffixes: &[String; 2],
) -> Result<Table> {
    let left_keys: Vec<Option<f64>> = left
        .column_values(on)?
        .into_iter()
        .map(time_key)
        .collect();
    let right_on = right.column_index(on).ok_or_else(|| DalError::MissingColumn {
        table: String::new(),
        column: on.to_string(),
    })?;

    let mut right_keys: Vec<(f64, usize)> = right
        .rows()
        .iter()
        .enumerate()
        .filter_map(|(index, row)| time_key(&row[right_on]).map(|key| (key, index)))
        .collect();
    right_keys.sort_by(|a, b| a.0.total_cmp(&b.0));

    let right_columns: Vec<usize> = (0..right.columns().len()).filter(|&i| i != right_on).collect();
    let right_names: Vec<&String> = right_columns.iter().map(|&i| &right.columns()[i]).collect();

    let mut columns = Vec::with_capacity(left.columns().len() + right_columns.len());
    for name in left.columns() {
        let clash = name != on && right_names.iter().any(|other| other.eq_ignore_ascii_case(name));
        columns.push(if clash { format!("{}{}", name, suffixes[0]) } else { name.clone() });
    }
    for name in &right_names {
        let clash = left.columns().iter().any(|other| other.eq_ignore_ascii_case(name));
        columns.push(if clash { format!("{}{}", name, suffixes[1]) } else { name.to_string() });
    }

    let rows = left
        .rows()
        .iter()
        .zip(&left_keys)
        .map(|(row, key)| {
            let matched = key.and_then(|key| nearest(&right_keys, key, tolerance));
            let mut out = row.clone();
            out.extend(right_columns.iter().map(|&i| match matched {
                Some(r) => right.rows()[r][i].clone(),
                None => CellValue::Null,
            }));
            out
        })
        .collect();

    Table::new(columns, rows)
}

fn nearest(sorted: &[(f64, usize)], key: f64, tolerance: Option<f64>) -> Option<usize> {
    // 같은 키가 여러 개면 앞쪽은 마지막, 뒤쪽은 첫 번째 행
    let backward = sorted.partition_point(|(k, _)| *k <= key).checked_sub(1).map(|i| sorted[i]);
    let forward = sorted.get(sorted.partition_point(|(k, _)| *k < key)).copied();

    let best = match (backward, forward) {
        (Some(b), Some(f)) => {
            if key - b.0 <= f.0 - key {
                b
            } else {
                f
            }
        }
        (Some(b), None) => b,
        (None, Some(f)) => f,
        (None, None) => return None,
    };

    match tolerance {
        Some(limit) if (best.0 - key).abs() > limit => None,
        _ => Some(best.1),
    }
}

/// `rolling_mean`/`rolling_std` 기준 z-score. 표준편차 0은 1로 나눕니다.
fn flag_outliers(table: &Table, column: &str, threshold: f64) -> Result<Table> {
    let values = table.column_values(column)?;
    let means = table.column_values("rolling_mean")?;
    let stds = table.column_values("rolling_std")?;

    let mut zscores = Vec::with_capacity(values.len());
    let mut flags = Vec::with_capacity(values.len());
    for ((value, mean), std) in values.iter().zip(&means).zip(&stds) {
        match (value.as_f64(), mean.as_f64(), std.as_f64()) {
            (Some(v), Some(m), Some(s)) => {
                let z = (v - m) / if s == 0.0 { 1.0 } else { s };
                zscores.push(CellValue::Real(z));
                flags.push(CellValue::Integer(i64::from(z.abs() > threshold)));
            }
            _ => {
                zscores.push(CellValue::Null);
                flags.push(CellValue::Integer(0));
            }
        }
    }

    table.with_column("zscore", zscores)?.with_column("is_outlier", flags)
}

fn rolling_stats(table: &Table, column: &str, window: usize) -> Result<Table> {
    let values: Vec<Option<f64>> = table
        .column_values(column)?
        .into_iter()
        .map(CellValue::as_f64)
        .collect();

    let mut means = Vec::with_capacity(values.len());
    let mut stds = Vec::with_capacity(values.len());
    for end in 0..values.len() {
        let start = (end + 1).saturating_sub(window);
        let current: Vec<f64> = values[start..=end].iter().flatten().copied().collect();
        let n = current.len();
        if n == 0 {
            means.push(CellValue::Null);
            stds.push(CellValue::Real(0.0));
            continue;
        }
        let mean = current.iter().sum::<f64>() / n as f64;
        let std = if n < 2 {
            0.0
        } else {
            let variance =
                current.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            variance.sqrt()
        };
        means.push(CellValue::Real(mean));
        stds.push(CellValue::Real(std));
    }

    table
        .with_column("rolling_mean", means)?
        .with_column("rolling_std", stds)
}

/// `{rows:<frame>}`, `{param:<key>}` 치환. 그 밖의 중괄호는 그대로 둡니다.
fn render_message(template: &str, frames: &Frames, params: &Map<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let token = &after[..close];
        match token.split_once(':') {
            Some(("rows", frame)) => out.push_str(&frames.get(frame)?.row_count().to_string()),
            Some(("param", key)) => match params.get(key) {
                Some(Value::String(s)) => out.push_str(s),
                Some(other) => out.push_str(&other.to_string()),
                None => out.push_str("null"),
            },
            _ => {
                out.push('{');
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TableStore;
    use serde_json::json;
    use tempfile::tempdir;

    fn sensor() -> Table {
        Table::new(
            vec!["ts".into(), "value".into()],
            vec![
                vec![CellValue::Text("t2".into()), CellValue::Integer(5)],
                vec![CellValue::Text("t0".into()), CellValue::Integer(1)],
                vec![CellValue::Text("t1".into()), CellValue::Integer(3)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_parse_all_ops() {
        let doc = RecipeDocument::parse(
            r#"{"steps": [
                {"op": "load", "table": "a", "as": "a"},
                {"op": "query", "sql": "SELECT 1 AS one", "as": "q"},
                {"op": "filter", "input": "a", "column": "v", "cmp": "ge", "value": 2},
                {"op": "sort", "input": "a", "by": "ts", "descending": true},
                {"op": "select", "input": "a", "columns": ["ts"], "as": "b"},
                {"op": "assign", "input": "b", "column": "kind", "value": "alarm"},
                {"op": "rolling", "input": "a", "column": "v", "window": {"param": "window", "default": 3}},
                {"op": "join", "left": "a", "right": "b", "tolerance": 1, "suffixes": ["_sql", "_csv"], "as": "j"},
                {"op": "save_table", "input": "a", "name": "out"},
                {"op": "save_timeseries", "input": "a", "name": "ts_out", "time_column": "ts"},
                {"op": "log", "message": "done"},
                {"op": "plot_timeseries", "x": "ts", "y": ["v"]},
                {"op": "add_event_markers"},
                {"op": "fail", "message": "boom"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(doc.steps.len(), 14);
        assert!(matches!(&doc.steps[7], Step::Join { on, tolerance: Some(_), .. } if on == "ts"));
        assert!(matches!(doc.steps[6], Step::Rolling { window: Operand::Param { .. }, .. }));
        assert!(matches!(doc.steps[5], Step::Assign { value: Operand::Literal(_), .. }));
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        assert!(RecipeDocument::parse(r#"{"steps": [{"op": "shell", "cmd": "rm"}]}"#).is_err());
    }

    #[test]
    fn test_operand_param_resolution() {
        let mut params = Map::new();
        params.insert("threshold".into(), json!(4));
        let op = Operand::Param { param: "threshold".into(), default: Some(json!(1)) };
        assert_eq!(op.resolve(&params).unwrap(), json!(4));

        let missing = Operand::Param { param: "other".into(), default: None };
        assert!(matches!(missing.resolve(&params), Err(DalError::InvalidInput(_))));
    }

    #[test]
    fn test_comparison_with_nulls() {
        assert!(!Comparison::Gt.matches(&CellValue::Null, &CellValue::Integer(0)));
        assert!(!Comparison::Ne.matches(&CellValue::Null, &CellValue::Integer(0)));
        assert!(Comparison::Ge.matches(&CellValue::Real(1.0), &CellValue::Integer(1)));
        assert!(Comparison::Eq.matches(&CellValue::Text("WARN".into()), &CellValue::Text("WARN".into())));
    }

    #[test]
    fn test_rolling_stats() {
        let table = Table::new(
            vec!["value".into()],
            vec![
                vec![CellValue::Integer(1)],
                vec![CellValue::Integer(3)],
                vec![CellValue::Null],
                vec![CellValue::Integer(5)],
            ],
        )
        .unwrap();
        let rolled = rolling_stats(&table, "value", 2).unwrap();
        let means: Vec<_> = rolled.column_values("rolling_mean").unwrap().into_iter().cloned().collect();
        assert_eq!(
            means,
            vec![CellValue::Real(1.0), CellValue::Real(2.0), CellValue::Real(3.0), CellValue::Real(5.0)]
        );
        let stds = rolled.column_values("rolling_std").unwrap();
        assert_eq!(stds[0], &CellValue::Real(0.0));
        assert_eq!(stds[1], &CellValue::Real(2f64.sqrt()));
    }

    #[test]
    fn test_flag_outliers() {
        let table = Table::new(
            vec!["value".into()],
            vec![
                vec![CellValue::Integer(10)],
                vec![CellValue::Integer(10)],
                vec![CellValue::Integer(10)],
                vec![CellValue::Integer(100)],
            ],
        )
        .unwrap();
        let rolled = rolling_stats(&table, "value", 3).unwrap();
        let flagged = flag_outliers(&rolled, "value", 1.0).unwrap();
        let flags: Vec<_> = flagged.column_values("is_outlier").unwrap().into_iter().cloned().collect();
        assert_eq!(
            flags,
            vec![CellValue::Integer(0), CellValue::Integer(0), CellValue::Integer(0), CellValue::Integer(1)]
        );
        // 표준편차 0이면 z = value - mean
        assert_eq!(flagged.column_values("zscore").unwrap()[1], &CellValue::Real(0.0));
    }

    fn series(rows: &[(&str, i64)]) -> Table {
        Table::new(
            vec!["ts".into(), "value".into()],
            rows.iter()
                .map(|(ts, v)| vec![CellValue::Text(ts.to_string()), CellValue::Integer(*v)])
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("1970-01-01T00:00:01Z"), Some(1.0));
        assert_eq!(parse_timestamp("1970-01-01T00:00:01.5+00:00"), Some(1.5));
        assert_eq!(parse_timestamp("1970-01-01 00:01:00"), Some(60.0));
        assert_eq!(parse_timestamp("1970-01-02"), Some(86_400.0));
        assert_eq!(parse_timestamp("12.5"), Some(12.5));
        assert_eq!(parse_timestamp("t0"), None);
    }

    #[test]
    fn test_join_nearest_with_tolerance() {
        let left = series(&[
            ("2024-01-01T00:00:00Z", 1),
            ("2024-01-01T00:00:10Z", 2),
            ("2024-01-01T00:00:20Z", 3),
        ]);
        let right = series(&[
            ("2024-01-01T00:00:20.400Z", 30),
            ("2024-01-01T00:00:00.900Z", 10),
            ("2024-01-01T00:00:13Z", 20),
        ]);
        let suffixes = ["_sql".to_string(), "_csv".to_string()];

        let joined = join_nearest(&left, &right, "ts", Some(1.0), &suffixes).unwrap();
        assert_eq!(joined.columns(), &["ts", "value_sql", "value_csv"].map(String::from));
        let matched: Vec<_> = joined.column_values("value_csv").unwrap().into_iter().cloned().collect();
        assert_eq!(matched, vec![CellValue::Integer(10), CellValue::Null, CellValue::Integer(30)]);

        // 허용 오차가 없으면 항상 가장 가까운 행
        let joined = join_nearest(&left, &right, "ts", None, &suffixes).unwrap();
        assert_eq!(joined.rows()[1][2], CellValue::Integer(20));
    }

    #[test]
    fn test_join_tie_prefers_earlier_and_keeps_left_rows() {
        let left = Table::new(
            vec!["ts".into(), "a".into()],
            vec![
                vec![CellValue::Integer(5), CellValue::Integer(1)],
                vec![CellValue::Null, CellValue::Integer(2)],
            ],
        )
        .unwrap();
        let right = Table::new(
            vec!["ts".into(), "b".into()],
            vec![
                vec![CellValue::Integer(7), CellValue::Text("late".into())],
                vec![CellValue::Integer(3), CellValue::Text("early".into())],
            ],
        )
        .unwrap();

        let joined = join_nearest(&left, &right, "ts", None, &default_suffixes()).unwrap();
        assert_eq!(joined.columns(), &["ts", "a", "b"].map(String::from));
        assert_eq!(joined.rows()[0][2], CellValue::Text("early".into()));
        assert_eq!(joined.rows()[1][2], CellValue::Null);
    }

    #[test]
    fn test_join_requires_key_on_both_sides() {
        let left = series(&[("2024-01-01T00:00:00Z", 1)]);
        let right = Table::new(vec!["value".into()], vec![]).unwrap();
        let err = join_nearest(&left, &right, "ts", None, &default_suffixes()).unwrap_err();
        assert!(matches!(err, DalError::MissingColumn { .. }));
        assert!(value_as_tolerance(&json!(-1)).is_err());
        assert_eq!(value_as_tolerance(&json!("0.5")).unwrap(), 0.5);
    }

    #[test]
    fn test_window_validation() {
        assert_eq!(value_as_window(&json!(60)).unwrap(), 60);
        assert_eq!(value_as_window(&json!("5")).unwrap(), 5);
        assert!(value_as_window(&json!(0)).is_err());
        assert!(value_as_window(&json!(-2)).is_err());
        assert_eq!(value_as_window(&json!(60.0)).unwrap(), 60);
        assert!(value_as_window(&json!(2.5)).is_err());
        assert!(value_as_window(&json!(-3.0)).is_err());
    }

    #[test]
    fn test_render_message() {
        let mut frames = Frames::default();
        frames.0.insert("alarms".into(), sensor());
        let mut params = Map::new();
        params.insert("site".into(), json!("north"));
        params.insert("limit".into(), json!(2.5));

        let text = render_message(
            "Saved {rows:alarms} alarm events at {param:site} (limit {param:limit}) {literal}",
            &frames,
            &params,
        )
        .unwrap();
        assert_eq!(text, "Saved 3 alarm events at north (limit 2.5) {literal}");

        assert!(render_message("{rows:missing}", &frames, &params).is_err());
        assert_eq!(render_message("open { brace", &frames, &params).unwrap(), "open { brace");
    }

    #[test]
    fn test_execute_transforms_and_saves() {
        let dir = tempdir().unwrap();
        let store = TableStore::new(dir.path());
        store.initialize().unwrap();
        store.save_table("sensor", &sensor()).unwrap();

        let doc = RecipeDocument::parse(
            r#"{"steps": [
                {"op": "load", "table": "sensor", "as": "s"},
                {"op": "filter", "input": "s", "column": "value", "cmp": "gt", "value": {"param": "min"}},
                {"op": "sort", "input": "s", "by": "ts"},
                {"op": "assign", "input": "s", "column": "event_type", "value": "alarm", "as": "events"},
                {"op": "save_timeseries", "input": "events", "name": "events out"},
                {"op": "log", "message": "kept {rows:events}"}
            ]}"#,
        )
        .unwrap();

        let mut params = Map::new();
        params.insert("min".into(), json!(2));
        let mut ctx = RecipeContext::new(&store, &params);
        doc.execute(&mut ctx).unwrap();

        assert_eq!(ctx.outputs(), &["events_out".to_string()]);
        assert_eq!(ctx.logs(), &["kept 2".to_string()]);

        let saved = store.load_table("events_out").unwrap();
        assert_eq!(saved.columns(), &["ts".to_string(), "value".to_string(), "event_type".to_string()]);
        let ts: Vec<_> = saved.column_values("ts").unwrap().into_iter().cloned().collect();
        assert_eq!(ts, vec![CellValue::Text("t1".into()), CellValue::Text("t2".into())]);
    }

    #[test]
    fn test_failing_step_is_logged() {
        let dir = tempdir().unwrap();
        let store = TableStore::new(dir.path());
        store.initialize().unwrap();
        let params = Map::new();
        let mut ctx = RecipeContext::new(&store, &params);

        let doc = RecipeDocument::parse(r#"{"steps": [{"op": "load", "table": "absent", "as": "a"}]}"#)
            .unwrap();
        let err = doc.execute(&mut ctx).unwrap_err();
        assert!(matches!(err, DalError::TableNotFound(_)));
        assert_eq!(ctx.logs(), &["step 1 (load) failed".to_string()]);
    }
}
