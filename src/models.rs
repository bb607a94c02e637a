//! DataAnalyzer Data Models
//!
//! 프로젝트 디렉토리에 저장되는 JSON 문서와 호출자에게 반환되는 결과 타입

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::recipe::RunStatus;

/// 프로젝트 정보 (레지스트리 항목 + 경로)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub path: String,
}

/// 프로젝트 메타데이터 문서 (`metadata.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionDescriptor>,
}

impl MetadataRecord {
    pub fn new(name: &str, description: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            description: description.map(str::to_string),
            datasets: Vec::new(),
            connections: BTreeMap::new(),
        }
    }
}

fn default_connection_type() -> String {
    "sqlserver".to_string()
}

fn default_port() -> u16 {
    1433
}

/// 외부 DB 연결 정보
///
/// 자격 증명은 메타데이터에 평문으로 저장됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_connection_type")]
    pub kind: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub trusted: bool,
}

impl ConnectionDescriptor {
    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
            && self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// 레시피 실행 기록 (`recipe_history.json`의 한 항목)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub recipe: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    /// 실행 완료 시각 (epoch millis). 이전 형식 문서에는 없음
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ran_at: Option<i64>,
}

/// 레시피 실행 결과
#[derive(Debug, Clone, Serialize)]
pub struct RecipeRunResult {
    pub recipe: String,
    pub status: RunStatus,
    pub logs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecipeRunResult {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// CSV 구분자 감지 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedFormat {
    pub delimiter: char,
}

/// 가져오기 결과
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub dataset_name: String,
    pub rows: usize,
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_format: Option<DetectedFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    pub tables: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_document_shape() {
        let mut record = MetadataRecord::new("Plant", None);
        record.datasets.push("sensor_data".into());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "Plant");
        assert!(json["description"].is_null());
        assert_eq!(json["datasets"], serde_json::json!(["sensor_data"]));
        assert!(json["connections"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_connection_defaults_from_legacy_document() {
        let descriptor: ConnectionDescriptor = serde_json::from_str(
            r#"{"type": "sqlserver", "host": "db01", "database": "Plant", "username": null, "password": null}"#,
        )
        .unwrap();
        assert_eq!(descriptor.port, 1433);
        assert!(!descriptor.trusted);
        assert!(!descriptor.has_credentials());
    }

    #[test]
    fn test_history_entry_without_timestamp() {
        let entry: HistoryEntry = serde_json::from_str(
            r#"{"recipe": "a.json", "parameters": {}, "outputs": ["x"], "logs": []}"#,
        )
        .unwrap();
        assert_eq!(entry.ran_at, None);
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("ran_at").is_none());
    }
}
