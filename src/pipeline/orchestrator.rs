use base64::Engine;
use metrics::{counter, histogram};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::models::pipeline::{PipelineResult, StageFlags};
use crate::pipeline::{classifier, detector, planner, scorer, strategy, StageFatal};
use crate::pipeline::knowledge::KnowledgeBase;
use crate::services::llm::LanguageModel;
use crate::services::storage::ImageStore;

/// Sequences the six pipeline stages for a job and owns their shared
/// resources. Cloning is cheap; every handle points at the same pool,
/// store, model client, knowledge base, and concurrency limiter.
#[derive(Clone)]
pub struct Orchestrator {
    db: SqlitePool,
    store: Arc<ImageStore>,
    llm: Arc<dyn LanguageModel>,
    knowledge: Arc<KnowledgeBase>,
    limiter: Arc<Semaphore>,
    max_signals: usize,
}

impl Orchestrator {
    pub fn new(
        db: SqlitePool,
        store: Arc<ImageStore>,
        llm: Arc<dyn LanguageModel>,
        knowledge: Arc<KnowledgeBase>,
        max_concurrent_jobs: usize,
        max_signals: usize,
    ) -> Self {
        Self {
            db,
            store,
            llm,
            knowledge,
            limiter: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            max_signals,
        }
    }

    /// Claim a pending job and process it in the background.
    ///
    /// Returns true only when this call performed the pending→processing
    /// transition. A job already processing or terminal is left untouched,
    /// so repeated invocations are no-ops.
    pub async fn start(&self, job_id: Uuid) -> Result<bool, sqlx::Error> {
        if !queries::try_mark_processing(&self.db, job_id).await? {
            return Ok(false);
        }

        let this = self.clone();
        tokio::spawn(async move {
            this.run_claimed(job_id).await;
        });

        Ok(true)
    }

    /// Run the full pipeline on raw image bytes without touching the job
    /// store. Used by the synchronous analysis endpoint; still bounded by
    /// the shared concurrency limiter.
    pub async fn run_now(&self, image_data: &[u8]) -> Result<PipelineResult, StageFatal> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| StageFatal::Shutdown)?;
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image_data);
        self.execute(&image_base64, None).await
    }

    /// Process a job this handle has already claimed.
    async fn run_claimed(&self, job_id: Uuid) {
        let permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(job_id = %job_id, "pipeline shutting down, releasing claimed job");
                self.mark_failed(job_id, "service shutting down").await;
                return;
            }
        };

        let started = Instant::now();
        info!(job_id = %job_id, "pipeline started");

        match self.run_job(job_id).await {
            Ok(result) => {
                histogram!("pipeline_job_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                counter!("pipeline_jobs_completed_total").increment(1);
                if result.degraded_stages.any() {
                    counter!("pipeline_jobs_degraded_total").increment(1);
                }
                info!(
                    job_id = %job_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    degraded = result.degraded_stages.any(),
                    "pipeline completed"
                );
            }
            Err(e) => {
                counter!("pipeline_jobs_failed_total").increment(1);
                error!(job_id = %job_id, error = %e, "pipeline failed");
                self.mark_failed(job_id, &e.to_string()).await;
            }
        }

        drop(permit);
    }

    async fn run_job(&self, job_id: Uuid) -> Result<PipelineResult, StageFatal> {
        let job = queries::get_job(&self.db, job_id)
            .await?
            .ok_or_else(|| StageFatal::Database(sqlx::Error::RowNotFound))?;

        let image_data = self.store.load(&job.image_path).await?;
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(&image_data);

        let result = self.execute(&image_base64, Some(job_id)).await?;

        let result_json = serde_json::to_value(&result)?;
        if !queries::complete_job(&self.db, job_id, &result_json).await? {
            // Job left processing under us (external intervention); the
            // stored state wins.
            warn!(job_id = %job_id, "job no longer processing at completion, result discarded");
        }

        Ok(result)
    }

    /// Runs the stage sequence. When `progress_for` names a job, partial
    /// output is persisted after each stage so observers can watch the job
    /// advance.
    async fn execute(
        &self,
        image_base64: &str,
        progress_for: Option<Uuid>,
    ) -> Result<PipelineResult, StageFatal> {
        let mut degraded = StageFlags::default();
        let mut progress = serde_json::Map::new();

        let classification = classifier::classify(self.llm.as_ref(), image_base64).await?;
        degraded.classifier = classification.degraded;
        let classification = classification.value;
        self.record_stage(progress_for, &mut progress, "classifier", "scene_classification",
            json!(classification), degraded.classifier)
            .await?;

        let signals =
            detector::detect(self.llm.as_ref(), image_base64, &classification, self.max_signals)
                .await?;
        degraded.detector = signals.degraded;
        let signals = signals.value;
        self.record_stage(progress_for, &mut progress, "detector", "fake_signals",
            json!(signals), degraded.detector)
            .await?;

        // Retrieval is total; it cannot degrade.
        let constraints = self.knowledge.retrieve(&classification.primary_scene);
        self.record_stage(progress_for, &mut progress, "retriever", "realism_constraints",
            json!(constraints), false)
            .await?;

        let plan_strategy =
            strategy::generate(self.llm.as_ref(), &classification, &signals, &constraints).await?;
        degraded.strategy = plan_strategy.degraded;
        let plan_strategy = plan_strategy.value;
        self.record_stage(progress_for, &mut progress, "strategy", "strategy",
            json!(plan_strategy), degraded.strategy)
            .await?;

        let plan = planner::plan(&plan_strategy);
        self.record_stage(progress_for, &mut progress, "planner", "execution_plan",
            json!(plan), false)
            .await?;

        let score = scorer::score(
            self.llm.as_ref(),
            &classification,
            &signals,
            &plan_strategy,
            &plan,
        )
        .await;
        degraded.scorer = score.degraded;
        let score = score.value;
        self.record_stage(progress_for, &mut progress, "scorer", "realism_score",
            json!(score), degraded.scorer)
            .await?;

        Ok(PipelineResult {
            scene_classification: classification,
            fake_signals: signals,
            realism_constraints: constraints,
            strategy: plan_strategy,
            execution_plan: plan,
            realism_score: score,
            degraded_stages: degraded,
        })
    }

    async fn record_stage(
        &self,
        progress_for: Option<Uuid>,
        progress: &mut serde_json::Map<String, serde_json::Value>,
        stage: &'static str,
        key: &str,
        value: serde_json::Value,
        was_degraded: bool,
    ) -> Result<(), StageFatal> {
        if was_degraded {
            counter!("pipeline_stage_degraded_total", "stage" => stage).increment(1);
        }
        progress.insert(key.to_string(), value);

        if let Some(job_id) = progress_for {
            let partial = serde_json::Value::Object(progress.clone());
            queries::save_stage_progress(&self.db, job_id, &partial).await?;
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, reason: &str) {
        if let Err(e) = queries::fail_job(&self.db, job_id, reason).await {
            error!(job_id = %job_id, error = %e, "failed to record job failure");
        }
    }
}
