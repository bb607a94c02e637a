//! 이름/경로 안전성 유틸리티
//!
//! - 사용자 입력 문자열을 안전한 식별자로 변환
//! - 사용자 입력에서 파생된 모든 파일 경로가 기준 디렉토리 안에 머무르는지 검증
//! - JSON 문서 원자적 쓰기 (임시 파일 + rename)

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DalError, Result};

/// 정리 결과가 비었을 때 사용하는 기본 이름
pub const FALLBACK_NAME: &str = "dataset";

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// `[A-Za-z0-9._-]` 밖의 문자 연속 구간을 `_` 하나로 치환하고 양 끝 `_`를 제거합니다.
/// 결과가 비면 `"dataset"`을 반환합니다.
pub fn sanitize_name(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut in_unsafe_run = false;

    for c in raw.chars() {
        if is_safe_char(c) {
            cleaned.push(c);
            in_unsafe_run = false;
        } else if !in_unsafe_run {
            cleaned.push('_');
            in_unsafe_run = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// 경로를 정규화된 절대 경로로 해석합니다.
/// 존재하는 구간은 심볼릭 링크까지 따라가고, 존재하지 않는 꼬리는 그대로 이어 붙입니다.
fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(part) => {
                resolved.push(part);
                if fs::symlink_metadata(&resolved).is_ok() {
                    // 끊어진 링크는 대상을 확인할 수 없으므로 거부
                    resolved = resolved.canonicalize().map_err(|e| {
                        DalError::PathEscape(format!("{} ({})", resolved.display(), e))
                    })?;
                }
            }
        }
    }

    Ok(resolved)
}

/// `target`이 `base` 자신이거나 그 하위 경로일 때만 해석된 경로를 반환합니다.
///
/// 비교 전에 양쪽 모두 해석하므로 `../` 탈출과 심볼릭 링크 탈출을 동일하게 거부합니다.
/// 상대 경로 `target`은 `base` 기준으로 해석합니다.
pub fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf> {
    let resolved_base = resolve_path(base)?;
    let candidate = if target.is_relative() {
        resolved_base.join(target)
    } else {
        target.to_path_buf()
    };
    let resolved_target = resolve_path(&candidate)?;

    if resolved_target.starts_with(&resolved_base) {
        Ok(resolved_target)
    } else {
        Err(DalError::PathEscape(target.display().to_string()))
    }
}

/// JSON 문서를 원자적으로 저장 (임시 파일에 쓰고 rename)
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// JSON 문서 읽기
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
