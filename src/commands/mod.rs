//! Commands Module
//!
//! 프로젝트 단위 작업 (CLI와 다른 호출자가 공유)

pub mod connector;
pub mod history;
pub mod import;
pub mod project;
pub mod report;
pub mod storage;
