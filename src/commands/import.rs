//! Dataset Import
//!
//! CSV/Excel 파일을 읽어 프로젝트 테이블로 저장하고 메타데이터에 데이터셋으로 등록합니다.
//! 같은 이름으로 다시 가져오면 테이블을 교체합니다.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{NaiveDate, TimeDelta};
use tracing::info;

use crate::commands::project::ProjectStore;
use crate::db::{unique_column_names, CellValue, Table};
use crate::error::{DalError, Result};
use crate::models::{DetectedFormat, ImportResult};
use crate::utils::sanitize_name;

/// 구분자 감지에 쓰는 앞부분 길이 (문자 수)
const SNIFF_SAMPLE_LEN: usize = 4096;
const SNIFF_MAX_LINES: usize = 10;
const CANDIDATE_DELIMITERS: [char; 4] = [',', ';', '\t', '|'];
const DEFAULT_DELIMITER: char = ',';

#[derive(Debug, Clone, Default)]
pub struct CsvImportOptions {
    /// 없으면 파일 이름(확장자 제외)
    pub dataset_name: Option<String>,
    /// 없으면 감지된 구분자
    pub delimiter: Option<char>,
    /// 소수점 문자 (기본 `.`)
    pub decimal: Option<char>,
    /// `utf-8`(기본) 또는 `latin-1`
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExcelImportOptions {
    pub dataset_name: Option<String>,
    /// 없으면 첫 번째 시트
    pub sheet_name: Option<String>,
    /// 헤더 행 (0부터)
    pub header_row: usize,
    /// 헤더 다음에서 추가로 건너뛸 데이터 행 수
    pub start_row: usize,
}

/// 정리된 이름으로 테이블 저장 + 데이터셋 등록. 저장된 이름을 반환합니다.
pub(crate) fn store_dataset(project: &ProjectStore, raw_name: &str, table: &Table) -> Result<String> {
    let dataset_name = sanitize_name(raw_name);
    project.tables().save_table(&dataset_name, table)?;
    project.register_dataset(&dataset_name)?;
    Ok(dataset_name)
}

fn dataset_name_or_stem(explicit: Option<&str>, path: &Path) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

// ============================================
// CSV
// ============================================

/// CSV 파일 가져오기
pub fn import_csv(project: &ProjectStore, path: &Path, options: &CsvImportOptions) -> Result<ImportResult> {
    let bytes = std::fs::read(path)?;
    let text = decode_text(&bytes, options.encoding.as_deref())?;

    let detected = DetectedFormat {
        delimiter: detect_delimiter(&text),
    };
    let delimiter = options.delimiter.unwrap_or(detected.delimiter);
    let decimal = options.decimal.unwrap_or('.');
    if delimiter == decimal {
        return Err(DalError::InvalidInput(format!(
            "delimiter and decimal separator are both '{}'",
            delimiter
        )));
    }

    let table = parse_csv(&text, delimiter, decimal)?;
    let dataset_name = store_dataset(
        project,
        &dataset_name_or_stem(options.dataset_name.as_deref(), path),
        &table,
    )?;

    info!(
        dataset = %dataset_name,
        rows = table.row_count(),
        delimiter = %delimiter.escape_default(),
        "csv imported"
    );

    Ok(ImportResult {
        dataset_name,
        rows: table.row_count(),
        columns: table.columns().to_vec(),
        detected_format: Some(detected),
        sheet_name: None,
        tables: project.tables().list_tables()?,
    })
}

fn decode_text(bytes: &[u8], encoding: Option<&str>) -> Result<String> {
    let encoding = encoding.unwrap_or("utf-8").trim().to_ascii_lowercase();
    match encoding.as_str() {
        "utf-8" | "utf8" | "utf-8-sig" => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| DalError::Import(format!("file is not valid UTF-8: {}", e)))?;
            Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
        }
        "latin-1" | "latin1" | "iso-8859-1" => Ok(bytes.iter().map(|&b| b as char).collect()),
        other => Err(DalError::InvalidInput(format!("unsupported encoding: {}", other))),
    }
}

/// 따옴표 밖의 구분자 수 세기
fn count_outside_quotes(line: &str, delimiter: char) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for c in line.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// 앞부분 몇 줄에서 줄마다 같은 횟수로 나타나는 후보 중 가장 많이 나타나는 것을 고릅니다.
/// 일관된 후보가 없으면 `,`
pub fn detect_delimiter(text: &str) -> char {
    let sample: String = text.chars().take(SNIFF_SAMPLE_LEN).collect();
    let truncated = sample.len() < text.len();

    let mut lines: Vec<&str> = sample.lines().filter(|l| !l.trim().is_empty()).collect();
    // 잘린 마지막 줄은 제외
    if truncated && lines.len() > 1 {
        lines.pop();
    }
    lines.truncate(SNIFF_MAX_LINES);
    if lines.is_empty() {
        return DEFAULT_DELIMITER;
    }

    let mut best: Option<(char, usize)> = None;
    for candidate in CANDIDATE_DELIMITERS {
        let first = count_outside_quotes(lines[0], candidate);
        if first == 0 {
            continue;
        }
        let consistent = lines[1..]
            .iter()
            .all(|line| count_outside_quotes(line, candidate) == first);
        if consistent && best.map_or(true, |(_, n)| first > n) {
            best = Some((candidate, first));
        }
    }
    best.map(|(c, _)| c).unwrap_or(DEFAULT_DELIMITER)
}

/// 따옴표(`""` 이스케이프), 따옴표 안 줄바꿈 처리
fn split_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(DalError::Import("unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    // 빈 줄 제거
    records.retain(|r| !(r.len() == 1 && r[0].trim().is_empty()));
    Ok(records)
}

fn parse_number(raw: &str, decimal: char) -> Option<CellValue> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(CellValue::Integer(i));
    }
    let normalized = if decimal == '.' {
        raw.to_string()
    } else {
        if raw.contains('.') {
            return None;
        }
        raw.replace(decimal, ".")
    };
    normalized
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(CellValue::Real)
}

fn is_missing(raw: &str) -> bool {
    raw.is_empty() || matches!(raw, "NA" | "N/A" | "NaN" | "nan" | "NULL" | "null")
}

/// 레코드 -> 테이블. 열에 숫자가 아닌 값이 하나라도 있으면 그 열은 전부 문자열로 둡니다.
fn parse_csv(text: &str, delimiter: char, decimal: char) -> Result<Table> {
    let mut records = split_records(text, delimiter)?.into_iter();
    let header = records
        .next()
        .ok_or_else(|| DalError::Import("file has no header row".to_string()))?;
    let columns = unique_column_names(&header);
    let width = columns.len();

    let mut raw_rows = Vec::new();
    for (index, mut record) in records.enumerate() {
        if record.len() > width {
            return Err(DalError::Import(format!(
                "line {}: expected {} fields, saw {}",
                index + 2,
                width,
                record.len()
            )));
        }
        record.resize(width, String::new());
        raw_rows.push(record);
    }

    let mut textual = vec![false; width];
    for row in &raw_rows {
        for (col, raw) in row.iter().enumerate() {
            let raw = raw.trim();
            if !is_missing(raw) && parse_number(raw, decimal).is_none() {
                textual[col] = true;
            }
        }
    }

    let rows = raw_rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(col, raw)| {
                    let trimmed = raw.trim();
                    if is_missing(trimmed) {
                        CellValue::Null
                    } else if textual[col] {
                        CellValue::Text(raw)
                    } else {
                        parse_number(trimmed, decimal).unwrap_or(CellValue::Null)
                    }
                })
                .collect()
        })
        .collect();

    Table::new(columns, rows)
}

// ============================================
// Excel
// ============================================

/// Excel(.xlsx/.xls/.xlsb/.ods) 시트 가져오기
pub fn import_excel(project: &ProjectStore, path: &Path, options: &ExcelImportOptions) -> Result<ImportResult> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet_names = workbook.sheet_names();
    let sheet_name = match &options.sheet_name {
        Some(name) if sheet_names.contains(name) => name.clone(),
        Some(name) => return Err(DalError::Import(format!("sheet '{}' not found", name))),
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| DalError::Import("workbook has no sheets".to_string()))?,
    };

    let range = workbook.worksheet_range(&sheet_name)?;
    // Range는 첫 번째 비어있지 않은 행부터 시작
    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let rows: Vec<&[Data]> = range.rows().collect();

    let header: Vec<String> = match options.header_row.checked_sub(first_row) {
        Some(index) => rows
            .get(index)
            .ok_or_else(|| {
                DalError::Import(format!(
                    "header row {} is past the end of sheet '{}'",
                    options.header_row, sheet_name
                ))
            })?
            .iter()
            .map(|cell| cell.to_string())
            .collect(),
        None => vec![String::new(); range.width()],
    };
    let columns = unique_column_names(&header);

    let data_start = (options.header_row + 1).saturating_sub(first_row);
    let table_rows = rows
        .iter()
        .skip(data_start)
        .skip(options.start_row)
        .map(|row| row.iter().map(excel_cell).collect())
        .collect();
    let table = Table::new(columns, table_rows)?;

    let dataset_name = store_dataset(
        project,
        &dataset_name_or_stem(options.dataset_name.as_deref(), path),
        &table,
    )?;
    info!(dataset = %dataset_name, sheet = %sheet_name, rows = table.row_count(), "excel imported");

    Ok(ImportResult {
        dataset_name,
        rows: table.row_count(),
        columns: table.columns().to_vec(),
        detected_format: None,
        sheet_name: Some(sheet_name),
        tables: project.tables().list_tables()?,
    })
}

fn excel_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Null,
        Data::Int(i) => CellValue::Integer(*i),
        Data::Float(f) => CellValue::Real(*f),
        Data::Bool(b) => CellValue::Integer(i64::from(*b)),
        Data::String(s) if s.is_empty() => CellValue::Null,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::DateTime(dt) => excel_serial_to_iso(dt.as_f64())
            .map(CellValue::Text)
            .unwrap_or(CellValue::Real(dt.as_f64())),
    }
}

/// Excel 일련 날짜(1899-12-30 기준 일수) -> `YYYY-MM-DDTHH:MM:SS`
fn excel_serial_to_iso(serial: f64) -> Option<String> {
    if !serial.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    let value = epoch.checked_add_signed(TimeDelta::try_milliseconds(millis)?)?;
    Some(value.format("%Y-%m-%dT%H:%M:%S").to_string())
}
