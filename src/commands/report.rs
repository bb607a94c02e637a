//! HTML Report
//!
//! 데이터셋 앞부분을 표로 보여주는 정적 HTML 파일을 `reports/`에 만듭니다.

use std::path::PathBuf;

use tracing::info;

use crate::commands::project::ProjectStore;
use crate::db::quote_ident;
use crate::error::{DalError, Result};
use crate::utils::{ensure_within, sanitize_name};

pub const REPORTS_DIR: &str = "reports";
/// 보고서에 포함하는 최대 행 수
pub const REPORT_ROW_LIMIT: usize = 500;

const REPORT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{ title }}</title></head>
<body>
<h1>{{ title }}</h1>
<p>Dataset: {{ dataset }}</p>
<table border="1" class="dataframe">
<thead><tr>{% for column in columns %}<th>{{ column }}</th>{% endfor %}</tr></thead>
<tbody>
{% for row in rows -%}
<tr>{% for cell in row %}<td>{{ cell }}</td>{% endfor %}</tr>
{% endfor -%}
</tbody>
</table>
</body>
</html>
"#;

/// `reports/<dataset>_report.html` 생성 후 경로 반환 (같은 이름은 덮어씀)
pub fn generate_html_report(project: &ProjectStore, dataset: &str, title: &str) -> Result<PathBuf> {
    let tables = project.tables();
    if !tables.has_table(dataset)? {
        return Err(DalError::TableNotFound(dataset.to_string()));
    }
    let preview = tables.run_query(&format!(
        "SELECT * FROM {} LIMIT {}",
        quote_ident(dataset),
        REPORT_ROW_LIMIT
    ))?;

    let root = project.root();
    let reports_dir = ensure_within(root, &root.join(REPORTS_DIR))?;
    std::fs::create_dir_all(&reports_dir)?;
    let output_path = ensure_within(
        &reports_dir,
        &reports_dir.join(format!("{}_report.html", sanitize_name(dataset))),
    )?;

    let rows: Vec<Vec<String>> = preview
        .rows()
        .iter()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect();
    let mut context = tera::Context::new();
    context.insert("title", title);
    context.insert("dataset", dataset);
    context.insert("columns", preview.columns());
    context.insert("rows", &rows);

    // 자동 이스케이프
    let html = tera::Tera::one_off(REPORT_TEMPLATE, &context, true)?;
    std::fs::write(&output_path, html)?;

    info!(dataset, path = %output_path.display(), rows = preview.row_count(), "report generated");
    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CellValue, Table};
    use tempfile::tempdir;

    #[test]
    fn test_report_escapes_and_limits_rows() {
        let dir = tempdir().unwrap();
        let project = ProjectStore::create(dir.path(), "Plant", None).unwrap();
        let mut rows = vec![vec![CellValue::Text("<script>alert('x')</script>".into())]];
        rows.extend((1..600).map(|i| vec![CellValue::Integer(i)]));
        project
            .tables()
            .save_table("events", &Table::new(vec!["note".into()], rows).unwrap())
            .unwrap();

        let path = generate_html_report(&project, "events", "Events & Alarms").unwrap();
        assert_eq!(path.file_name().unwrap(), "events_report.html");
        assert!(path.starts_with(dir.path().canonicalize().unwrap().join(REPORTS_DIR)));

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("<title>Events &amp; Alarms</title>"));
        assert!(html.contains("&lt;script&gt;alert(&#x27;x&#x27;)&lt;&#x2F;script&gt;"));
        assert!(!html.contains("<script>"));
        assert_eq!(html.matches("<tr>").count(), REPORT_ROW_LIMIT + 1);
    }

    #[test]
    fn test_report_renders_nulls_empty_and_matches_case_insensitively() {
        let dir = tempdir().unwrap();
        let project = ProjectStore::create(dir.path(), "Plant", None).unwrap();
        let table = Table::new(
            vec!["ts".into(), "value".into()],
            vec![vec![CellValue::Text("t0".into()), CellValue::Null]],
        )
        .unwrap();
        project.tables().save_table("Sensor", &table).unwrap();

        let path = generate_html_report(&project, "sensor", "Sensor").unwrap();
        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("<thead><tr><th>ts</th><th>value</th></tr></thead>"));
        assert!(html.contains("<tr><td>t0</td><td></td></tr>"));
    }

    #[test]
    fn test_missing_dataset() {
        let dir = tempdir().unwrap();
        let project = ProjectStore::create(dir.path(), "Plant", None).unwrap();
        let err = generate_html_report(&project, "absent", "t").unwrap_err();
        assert!(matches!(err, DalError::TableNotFound(_)));
        assert!(!dir.path().join(REPORTS_DIR).exists());
    }
}
