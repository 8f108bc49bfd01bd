//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **资源装配**：按配置创建检查点存储、结果存储和运行清单存储
//! 2. **后端装配**：按需要的提供商创建评分后端（只读命令不需要凭据）
//! 3. **输入加载**：从目录加载规划书和评分标准
//! 4. **命令执行**：新建、恢复、查询、重新排队

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clients::BackendRegistry;
use crate::config::Config;
use crate::infrastructure::{RunLayout, RunStore};
use crate::models::{
    load_documents, load_prompts, ProviderId, RunId, RunReport, RunStatus, TaskResult,
};
use crate::orchestrator::Orchestrator;
use crate::services::{CheckpointStore, FileCheckpointStore, FileResultSink, ResultSink};
use crate::utils::logging;
use crate::workflow::ScoringFlow;

/// 新建运行的参数（未指定的使用配置中的值）
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub providers: Option<Vec<String>>,
    pub concurrency: Option<usize>,
    pub mds_dir: Option<String>,
    pub prompts_dir: Option<String>,
}

/// 应用主结构
pub struct App {
    config: Config,
    layout: RunLayout,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn ResultSink>,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config) -> Self {
        logging::log_startup(&config);

        let layout = RunLayout::new(&config.data_dir);
        Self {
            checkpoints: Arc::new(FileCheckpointStore::new(layout.clone())),
            sink: Arc::new(FileResultSink::new(layout.clone())),
            layout,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 用指定的后端创建编排器
    pub fn orchestrator(&self, backends: BackendRegistry) -> Orchestrator {
        let flow = ScoringFlow::new(
            self.checkpoints.clone(),
            self.sink.clone(),
            self.config.retry_policy(),
        )
        .with_verbose_logging(self.config.verbose_logging);

        Orchestrator::new(
            backends,
            self.checkpoints.clone(),
            self.sink.clone(),
            RunStore::new(self.layout.clone()),
            flow,
            self.config.max_concurrent_tasks,
        )
    }

    /// 只读命令使用的编排器（不需要凭据）
    fn reader(&self) -> Orchestrator {
        self.orchestrator(BackendRegistry::new())
    }

    /// 新建运行并执行
    pub async fn run(&self, options: RunOptions, cancel: CancellationToken) -> Result<RunReport> {
        let providers: Vec<ProviderId> = match options.providers {
            Some(ids) => ids.iter().map(ProviderId::new).collect(),
            None => self.config.provider_ids(),
        };
        let backends = BackendRegistry::from_config(&self.config, &providers)?;
        // 没有凭据的提供商已被跳过
        let providers: Vec<ProviderId> = providers
            .into_iter()
            .filter(|p| backends.contains(p))
            .collect();

        info!("\n📁 正在加载规划书和评分标准...");
        let mds_dir = options.mds_dir.as_deref().unwrap_or(&self.config.mds_dir);
        let prompts_dir = options
            .prompts_dir
            .as_deref()
            .unwrap_or(&self.config.prompts_dir);
        let documents = load_documents(mds_dir).await?;
        let prompts = load_prompts(prompts_dir).await?;

        let report = self
            .orchestrator(backends)
            .start_run(documents, prompts, &providers, options.concurrency, cancel)
            .await
            .context("运行失败")?;

        logging::print_final_stats(&report);
        Ok(report)
    }

    /// 恢复运行
    pub async fn resume(
        &self,
        run_id: &RunId,
        concurrency: Option<usize>,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let manifest = RunStore::new(self.layout.clone())
            .load(run_id)
            .await
            .with_context(|| format!("无法加载运行 {}", run_id))?;
        let providers: Vec<ProviderId> = manifest.providers.iter().map(|p| p.id.clone()).collect();
        let backends = BackendRegistry::from_config(&self.config, &providers)?;

        let report = self
            .orchestrator(backends)
            .resume_run(run_id, concurrency, cancel)
            .await
            .with_context(|| format!("恢复运行 {} 失败", run_id))?;

        logging::print_final_stats(&report);
        Ok(report)
    }

    pub async fn status(&self, run_id: &RunId) -> Result<RunStatus> {
        let status = self.reader().get_run_status(run_id).await?;
        logging::print_run_status(run_id, &status);
        Ok(status)
    }

    /// 运行结果（按矩阵顺序）；`failed_only` 时只返回失败的任务
    pub async fn results(&self, run_id: &RunId, failed_only: bool) -> Result<Vec<TaskResult>> {
        let results = self.reader().get_results(run_id).await?;
        Ok(results
            .into_iter()
            .filter(|r| !failed_only || !r.is_ok())
            .collect())
    }

    pub async fn requeue(&self, run_id: &RunId, include_parse_failed: bool) -> Result<usize> {
        Ok(self
            .reader()
            .requeue_failed(run_id, include_parse_failed)
            .await?)
    }

    /// 所有运行及其状态（新的在前）
    pub async fn list(&self) -> Result<Vec<(RunId, RunStatus)>> {
        let reader = self.reader();
        let mut runs = Vec::new();
        for run_id in reader.list_runs().await? {
            let status = reader.get_run_status(&run_id).await?;
            runs.push((run_id, status));
        }
        Ok(runs)
    }
}
