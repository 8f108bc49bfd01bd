use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use planbook_scorer::cli::{Cli, Command};
use planbook_scorer::models::{RunId, RunState};
use planbook_scorer::utils::logging;
use planbook_scorer::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // .env 不存在时忽略
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // 加载配置
    let mut config = Config::load(cli.config.as_deref())?;
    config.verbose_logging |= cli.verbose;

    // 初始化日志
    logging::init(config.verbose_logging);

    // Ctrl-C：停止派发，进行中的调用允许完成
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，停止派发新任务，等待进行中的调用结束...");
            signal.cancel();
        }
    });

    let app = App::initialize(config);

    match cli.command {
        Command::Run {
            providers,
            concurrency,
            mds,
            prompts,
        } => {
            let options = Command::run_options(providers, concurrency, mds, prompts);
            let report = app.run(options, cancel).await?;
            if report.state == RunState::Aborted {
                anyhow::bail!("运行 {} 已中止", report.run_id);
            }
        }
        Command::Resume {
            run_id,
            concurrency,
        } => {
            let run_id = RunId::parse(&run_id)?;
            let report = app.resume(&run_id, concurrency, cancel).await?;
            if report.state == RunState::Aborted {
                anyhow::bail!("运行 {} 已中止", report.run_id);
            }
        }
        Command::Status { run_id } => {
            app.status(&RunId::parse(&run_id)?).await?;
        }
        Command::Results { run_id, failed } => {
            for result in app.results(&RunId::parse(&run_id)?, failed).await? {
                println!("{}", serde_json::to_string(&result)?);
            }
        }
        Command::Requeue {
            run_id,
            parse_failed,
        } => {
            let run_id = RunId::parse(&run_id)?;
            let cleared = app.requeue(&run_id, parse_failed).await?;
            info!("已清除 {} 个检查点，执行 `resume {}` 重新评分", cleared, run_id);
        }
        Command::List => {
            let runs = app.list().await?;
            if runs.is_empty() {
                info!("还没有任何运行");
            }
            for (run_id, status) in runs {
                logging::print_run_status(&run_id, &status);
            }
        }
    }

    Ok(())
}
