//! 命令行入口
//!
//! 每个子命令返回进程退出码：0 成功，2 配置无效，3 已有运行，4 没有可停止的运行，1 内部错误。
//! `serve` 的 HTTP 状态码沿用同一套分类，见 `server::error`。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::RunError;
use crate::infrastructure::OutputStore;
use crate::models::{load_matrix_definition, GroupKey, MatrixDefinition};
use crate::orchestrator::{build_matrix, Aggregator, RunController, RunState};
use crate::server::{start_server, AppState, ServerConfig};
use crate::services::{BrowserEvaluator, ComparisonNarrator, JsonBlockExtractor, LlmNarrator};
use crate::utils::logging;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "travel-quality-eval",
    version,
    about = "Matrix-driven quality evaluation of travel websites"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the evaluation matrix described by a config file
    Run {
        #[arg(long, short)]
        config: PathBuf,

        /// Skip the LLM comparison narrative
        #[arg(long)]
        no_narrative: bool,
    },

    /// Serve the run controller over HTTP (start/stop/status/logs)
    Serve {
        /// Default matrix config for `POST /api/start`
        #[arg(long, short)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 8080)]
        port: u16,

        /// Skip the LLM comparison narrative
        #[arg(long)]
        no_narrative: bool,
    },

    /// Validate a config file and print the expanded matrix
    Validate {
        #[arg(long, short)]
        config: PathBuf,
    },

    /// Print a run log (the most recent one by default)
    Logs {
        #[arg(long)]
        file: Option<String>,
    },

    /// List run log files, newest first
    ListLogs,

    /// Rebuild one comparison artifact from the recordings of a past run
    Regenerate {
        #[arg(long)]
        feature: String,
        #[arg(long)]
        city: String,
        #[arg(long)]
        date_range: String,
        #[arg(long)]
        run_id: String,

        /// Matrix config whose `[prompts]` and `[run]` settings apply to the narrative
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

pub async fn run(args: Cli) -> Result<i32> {
    let config = Config::from_env();
    logging::init(config.verbose_logging);

    match args.command {
        Command::Run {
            config: path,
            no_narrative,
        } => run_matrix(&config, path, no_narrative).await,
        Command::Serve {
            config: path,
            host,
            port,
            no_narrative,
        } => serve(&config, path, ServerConfig { host, port }, no_narrative).await,
        Command::Validate { config: path } => validate(path).await,
        Command::Logs { file } => print_log(&config, file).await,
        Command::ListLogs => list_logs(&config).await,
        Command::Regenerate {
            feature,
            city,
            date_range,
            run_id,
            config: path,
        } => {
            let group = GroupKey {
                feature,
                city,
                date_range,
            };
            regenerate(&config, group, &run_id, path).await
        }
    }
}

/// 读取配置文件，失败时返回对应的退出码
async fn load_definition(path: &Path) -> Result<MatrixDefinition, i32> {
    match load_matrix_definition(path).await {
        Ok(definition) => Ok(definition),
        Err(e) => {
            let err = RunError::Configuration(e);
            error!("❌ {}", err);
            Err(err.exit_code())
        }
    }
}

async fn run_matrix(config: &Config, path: PathBuf, no_narrative: bool) -> Result<i32> {
    let definition = match load_definition(&path).await {
        Ok(definition) => definition,
        Err(code) => return Ok(code),
    };
    // 连接浏览器前先确认配置可用
    if let Err(e) = definition.validate() {
        let err = RunError::Configuration(e);
        error!("❌ {}", err);
        return Ok(err.exit_code());
    }

    let controller = spawn_controller(config, no_narrative).await?;

    logging::log_startup(definition.run.max_workers, definition.run.max_attempts);
    match controller.start(definition).await {
        Ok(run_id) => info!("▶️ 运行已开始: {}", run_id),
        Err(e) => {
            error!("❌ {}", e);
            return Ok(e.exit_code());
        }
    }

    let status = tokio::select! {
        status = controller.wait() => status?,
        _ = tokio::signal::ctrl_c() => {
            warn!("⏹️ 收到 Ctrl-C，等待在途单元结束...");
            if let Err(e) = controller.stop().await {
                warn!("停止请求失败: {}", e);
            }
            controller.wait().await?
        }
    };

    logging::print_final_stats(&status);
    Ok(exit_code(status.state))
}

/// 连接浏览器并启动运行控制器
async fn spawn_controller(config: &Config, no_narrative: bool) -> Result<RunController> {
    let evaluator = BrowserEvaluator::connect(config)
        .await
        .context("浏览器连接失败")?;
    let narrator: Option<Arc<dyn ComparisonNarrator>> = if no_narrative {
        None
    } else {
        Some(Arc::new(LlmNarrator::new(config)))
    };

    Ok(RunController::spawn(
        OutputStore::from_config(config),
        Arc::new(evaluator),
        Arc::new(JsonBlockExtractor),
        narrator,
    ))
}

async fn serve(
    config: &Config,
    path: Option<PathBuf>,
    server: ServerConfig,
    no_narrative: bool,
) -> Result<i32> {
    // 默认配置在启动时就检查一遍，请求时再重新读取
    if let Some(path) = &path {
        let definition = match load_definition(path).await {
            Ok(definition) => definition,
            Err(code) => return Ok(code),
        };
        if let Err(e) = definition.validate() {
            let err = RunError::Configuration(e);
            error!("❌ {}", err);
            return Ok(err.exit_code());
        }
    }

    let controller = spawn_controller(config, no_narrative).await?;
    start_server(server, AppState::new(controller, path)).await?;
    Ok(0)
}

fn exit_code(state: RunState) -> i32 {
    match state {
        RunState::Completed | RunState::Stopped => 0,
        RunState::Idle | RunState::Running | RunState::Errored => 1,
    }
}

async fn validate(path: PathBuf) -> Result<i32> {
    let definition = match load_definition(&path).await {
        Ok(definition) => definition,
        Err(code) => return Ok(code),
    };
    let matrix = match definition
        .validate()
        .and_then(|validated| build_matrix(&validated, Local::now().date_naive()))
    {
        Ok(matrix) => matrix,
        Err(e) => {
            let err = RunError::Configuration(e);
            error!("❌ {}", err);
            return Ok(err.exit_code());
        }
    };

    for cell in &matrix.cells {
        println!(
            "{:>4}  {}  {} → {}  {}",
            cell.index,
            cell.key,
            cell.dates.checkin_str(),
            cell.dates.checkout_str(),
            cell.website_url
        );
    }
    println!(
        "✅ 配置有效: {} 个单元, {} 个单元组",
        matrix.cells.len(),
        matrix.groups.len()
    );
    Ok(0)
}

async fn print_log(config: &Config, file: Option<String>) -> Result<i32> {
    let store = OutputStore::from_config(config);
    let name = match file {
        Some(name) => name,
        None => match store.list_log_files().await?.into_iter().next() {
            Some(latest) => latest,
            None => {
                println!("没有运行日志");
                return Ok(0);
            }
        },
    };
    let content = store
        .read_log(&name)
        .await
        .with_context(|| format!("读取日志失败: {}", name))?;
    print!("{}", content);
    Ok(0)
}

async fn list_logs(config: &Config) -> Result<i32> {
    let store = OutputStore::from_config(config);
    for name in store.list_log_files().await? {
        println!("{}", name);
    }
    Ok(0)
}

async fn regenerate(
    config: &Config,
    group: GroupKey,
    run_id: &str,
    path: Option<PathBuf>,
) -> Result<i32> {
    let definition = match path {
        Some(path) => match load_definition(&path).await {
            Ok(definition) => Some(definition),
            Err(code) => return Ok(code),
        },
        None => None,
    };

    let store = OutputStore::from_config(config);
    let narrator: Arc<dyn ComparisonNarrator> = Arc::new(LlmNarrator::new(config));
    let aggregator = regenerate_aggregator(store.clone(), narrator, definition.as_ref());

    let artifact = aggregator
        .regenerate(&group, run_id)
        .await
        .with_context(|| format!("重新生成对比产物失败: {} ({})", group, run_id))?;
    info!(
        "♻️ 已重新生成: {} (有结果 {}, 缺失 {})",
        store.comparison_dir(&group).display(),
        artifact.stats.rated,
        artifact.stats.missing
    );
    Ok(0)
}

/// 重新生成用的聚合器；有配置文件时沿用其中的对比分析提示词和超时
pub fn regenerate_aggregator(
    store: OutputStore,
    narrator: Arc<dyn ComparisonNarrator>,
    definition: Option<&MatrixDefinition>,
) -> Aggregator {
    let comparison_system = definition.and_then(|d| d.prompts.comparison_system.clone());
    let aggregator = Aggregator::new(
        store,
        Arc::new(JsonBlockExtractor),
        Some(narrator),
        comparison_system,
    );
    match definition {
        Some(d) => aggregator.with_narration_timeout(d.run.narration_timeout),
        None => aggregator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_regenerate_args() {
        let cli = Cli::try_parse_from([
            "travel-quality-eval",
            "regenerate",
            "--feature",
            "relevance_of_top_listings",
            "--city",
            "tokyo",
            "--date-range",
            "next_day_one_night",
            "--run-id",
            "20261019_101500_123",
        ])
        .unwrap();
        match cli.command {
            Command::Regenerate { date_range, run_id, .. } => {
                assert_eq!(date_range, "next_day_one_night");
                assert_eq!(run_id, "20261019_101500_123");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["travel-quality-eval", "serve", "--port", "9000"]).unwrap();
        match cli.command {
            Command::Serve {
                config,
                host,
                port,
                no_narrative,
            } => {
                assert_eq!(config, None);
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 9000);
                assert!(!no_narrative);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_stopped_run_exits_cleanly() {
        assert_eq!(exit_code(RunState::Completed), 0);
        assert_eq!(exit_code(RunState::Stopped), 0);
        assert_eq!(exit_code(RunState::Errored), 1);
    }

    #[tokio::test]
    async fn test_validate_reports_missing_file_as_config_error() {
        let code = validate(PathBuf::from("/nonexistent/matrix.toml")).await.unwrap();
        assert_eq!(code, 2);
    }
}
