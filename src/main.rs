//! data-analyzer CLI
//!
//! 결과는 stdout에 JSON으로, 에러는 stderr에 `CommandError` JSON으로 출력합니다.
//! 실패한 레시피 실행은 결과를 출력하고 종료 코드 2로 끝납니다.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use dal_lib::commands::history::list_history;
use dal_lib::commands::import::{import_csv, import_excel, CsvImportOptions, ExcelImportOptions};
use dal_lib::commands::report::generate_html_report;
use dal_lib::commands::storage::export_bundle;
use dal_lib::models::ConnectionDescriptor;
use dal_lib::{AppConfig, CommandError, DalError, ProjectRegistry, RecipeEngine, Result};

#[derive(Parser)]
#[command(name = "data-analyzer", version, about = "DataAnalyzer project store and recipe runner")]
struct Cli {
    /// 프로젝트 루트 디렉토리 (기본: DATA_ANALYZER_PROJECTS_DIR 또는 data/projects)
    #[arg(long, global = true, value_name = "DIR")]
    projects_dir: Option<PathBuf>,
    /// 레시피 디렉토리 (기본: DATA_ANALYZER_RECIPES_DIR 또는 recipes)
    #[arg(long, global = true, value_name = "DIR")]
    recipes_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 새 프로젝트 생성
    CreateProject {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// 등록된 프로젝트 목록
    ListProjects,
    /// CSV 파일을 데이터셋으로 가져오기
    ImportCsv {
        #[arg(long)]
        project: String,
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
        #[arg(long)]
        dataset: Option<String>,
        /// 구분자 (`tab` 허용). 생략하면 자동 감지
        #[arg(long, value_parser = parse_delimiter)]
        delimiter: Option<char>,
        #[arg(long)]
        decimal: Option<char>,
        #[arg(long)]
        encoding: Option<String>,
    },
    /// Excel 시트를 데이터셋으로 가져오기
    ImportExcel {
        #[arg(long)]
        project: String,
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
        #[arg(long)]
        dataset: Option<String>,
        #[arg(long)]
        sheet: Option<String>,
        #[arg(long, default_value_t = 0)]
        header_row: usize,
        #[arg(long, default_value_t = 0)]
        start_row: usize,
    },
    /// 프로젝트 테이블 목록
    Tables {
        #[arg(long)]
        project: String,
    },
    /// 읽기 쿼리 실행
    Query {
        #[arg(long)]
        project: String,
        #[arg(long)]
        sql: String,
        /// `:name` 파라미터 값 (JSON 객체)
        #[arg(long)]
        params: Option<String>,
    },
    /// SQL Server 연결 정보 저장
    SaveConnection {
        #[arg(long)]
        project: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 1433)]
        port: u16,
        #[arg(long)]
        database: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        trusted: bool,
    },
    /// 사용 가능한 레시피 목록
    ListRecipes,
    /// 레시피 실행
    RunRecipe {
        #[arg(long)]
        project: String,
        #[arg(long)]
        recipe: String,
        /// 레시피 파라미터 (JSON 객체)
        #[arg(long)]
        params: Option<String>,
    },
    /// 레시피 실행 기록
    History {
        #[arg(long)]
        project: String,
    },
    /// HTML 보고서 생성
    Report {
        #[arg(long)]
        project: String,
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// 프로젝트 zip 번들 내보내기
    Export {
        #[arg(long)]
        project: String,
    },
}

fn parse_delimiter(raw: &str) -> std::result::Result<char, String> {
    match raw {
        "tab" | "\\t" => Ok('\t'),
        _ => {
            let mut chars = raw.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(format!("delimiter must be a single character: {}", raw)),
            }
        }
    }
}

fn parse_params(raw: Option<&str>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(text) => match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(map),
            other => Err(DalError::InvalidInput(format!(
                "params must be a JSON object, got {}",
                other
            ))),
        },
    }
}

/// 명령 실행 결과
struct Outcome {
    body: Value,
    ok: bool,
}

impl Outcome {
    fn ok(body: impl Serialize) -> Result<Self> {
        Ok(Self {
            body: serde_json::to_value(body)?,
            ok: true,
        })
    }
}

fn execute(config: &AppConfig, command: Commands) -> Result<Outcome> {
    let registry = ProjectRegistry::from_config(config);

    match command {
        Commands::CreateProject { name, description } => {
            config.initialize()?;
            Outcome::ok(registry.create_project(&name, description.as_deref())?)
        }
        Commands::ListProjects => Outcome::ok(registry.list_projects()?),
        Commands::ImportCsv {
            project,
            file,
            dataset,
            delimiter,
            decimal,
            encoding,
        } => {
            let project = registry.resolve(&project)?;
            let options = CsvImportOptions {
                dataset_name: dataset,
                delimiter,
                decimal,
                encoding,
            };
            Outcome::ok(import_csv(&project, &file, &options)?)
        }
        Commands::ImportExcel {
            project,
            file,
            dataset,
            sheet,
            header_row,
            start_row,
        } => {
            let project = registry.resolve(&project)?;
            let options = ExcelImportOptions {
                dataset_name: dataset,
                sheet_name: sheet,
                header_row,
                start_row,
            };
            Outcome::ok(import_excel(&project, &file, &options)?)
        }
        Commands::Tables { project } => {
            Outcome::ok(registry.resolve(&project)?.tables().list_tables()?)
        }
        Commands::Query {
            project,
            sql,
            params,
        } => {
            let params = parse_params(params.as_deref())?;
            let project = registry.resolve(&project)?;
            Outcome::ok(project.tables().run_query_with(&sql, &params)?)
        }
        Commands::SaveConnection {
            project,
            name,
            host,
            port,
            database,
            username,
            password,
            trusted,
        } => {
            let project = registry.resolve(&project)?;
            let descriptor = ConnectionDescriptor {
                name,
                kind: dal_lib::commands::connector::SQLSERVER_KIND.to_string(),
                host,
                port,
                database,
                username,
                password,
                trusted,
            };
            project.save_connection(&descriptor)?;
            Outcome::ok(serde_json::json!({ "status": "saved", "name": descriptor.name }))
        }
        Commands::ListRecipes => Outcome::ok(RecipeEngine::from_config(config).list_recipes()?),
        Commands::RunRecipe {
            project,
            recipe,
            params,
        } => {
            let params = parse_params(params.as_deref())?;
            let project = registry.resolve(&project)?;
            let result = RecipeEngine::from_config(config).run(project.root(), &recipe, &params)?;
            let ok = result.succeeded();
            Ok(Outcome {
                body: serde_json::to_value(result)?,
                ok,
            })
        }
        Commands::History { project } => {
            Outcome::ok(list_history(registry.resolve(&project)?.root())?)
        }
        Commands::Report {
            project,
            dataset,
            title,
        } => {
            let project = registry.resolve(&project)?;
            let title = title.unwrap_or_else(|| dataset.clone());
            let path = generate_html_report(&project, &dataset, &title)?;
            Outcome::ok(serde_json::json!({ "status": "created", "path": path.display().to_string() }))
        }
        Commands::Export { project } => {
            let path = export_bundle(&registry.resolve(&project)?)?;
            Outcome::ok(serde_json::json!({ "status": "created", "path": path.display().to_string() }))
        }
    }
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to serialize output: {}", e),
    }
}

fn main() -> ExitCode {
    // stdout은 JSON 출력 전용
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()
        .with_projects_root(cli.projects_dir.as_deref())
        .with_recipes_root(cli.recipes_dir.as_deref());

    match execute(&config, cli.command) {
        Ok(outcome) => {
            print_json(&outcome.body);
            if outcome.ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(e) => {
            let error = CommandError::from(e);
            match serde_json::to_string_pretty(&error) {
                Ok(text) => eprintln!("{}", text),
                Err(_) => eprintln!("{}: {}", error.code, error.message),
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("tab").unwrap(), '\t');
        assert_eq!(parse_delimiter(";").unwrap(), ';');
        assert!(parse_delimiter(";;").is_err());
    }

    #[test]
    fn test_parse_params() {
        assert!(parse_params(None).unwrap().is_empty());
        assert_eq!(parse_params(Some(r#"{"threshold": 2}"#)).unwrap()["threshold"], 2);
        assert!(matches!(parse_params(Some("[1]")), Err(DalError::InvalidInput(_))));
        assert!(parse_params(Some("{")).is_err());
    }
}
