use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::pipeline::error::JobError;
use crate::pipeline::job::{run_job, Job, JobResult};
use crate::pipeline::postprocess::PostProcessor;
use crate::pipeline::presets::PresetResolver;
use crate::pipeline::request::ImageSize;
use crate::pipeline::client::SharedGenerationClient;
use crate::pipeline::runtime::{PipelineCommandRunner, StdPipelineCommandRunner};
use crate::worker::{effective_worker_count, run_bounded, JobState, DEFAULT_MAX_WORKERS};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to load presets: {0}")]
    Preset(#[source] JobError),
    #[error("no jobs to process")]
    NoJobs,
}

/// Everything a job needs besides the job itself. Shared read-only by all
/// workers.
pub struct BatchContext<R: PipelineCommandRunner = StdPipelineCommandRunner> {
    pub presets: PresetResolver,
    pub image_size: ImageSize,
    pub client: SharedGenerationClient,
    pub post_processor: PostProcessor<R>,
    pub max_workers: usize,
    pub unique_names: bool,
}

impl<R: PipelineCommandRunner> BatchContext<R> {
    pub fn new(
        presets: PresetResolver,
        client: SharedGenerationClient,
        post_processor: PostProcessor<R>,
    ) -> Self {
        Self {
            presets,
            image_size: ImageSize::default(),
            client,
            post_processor,
            max_workers: DEFAULT_MAX_WORKERS,
            unique_names: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchProgress<'a> {
    pub completed: usize,
    pub total: usize,
    pub result: &'a JobResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub started_at: String,
    pub preset: Option<String>,
    pub image_size: String,
    pub workers: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_seconds: f64,
    pub results: Vec<JobResult>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Resolves the presets once, then runs every job on the bounded pool.
/// One job failing never stops the others; the per-job outcome lands in the
/// report in completion order.
pub fn run_batch<R, P>(
    jobs: &[Job],
    preset_spec: Option<&str>,
    ctx: &BatchContext<R>,
    mut on_progress: P,
) -> Result<BatchReport, BatchError>
where
    R: PipelineCommandRunner,
    P: FnMut(BatchProgress<'_>),
{
    if jobs.is_empty() {
        return Err(BatchError::NoJobs);
    }
    let preset_text = match preset_spec {
        Some(spec) => ctx.presets.resolve(spec).map_err(BatchError::Preset)?,
        None => String::new(),
    };

    let total = jobs.len();
    let workers = effective_worker_count(ctx.max_workers, total);
    let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let timer = Instant::now();
    info!(total, workers, size = %ctx.image_size, preset = preset_spec.unwrap_or(""), "starting batch");

    let mut results: Vec<JobResult> = Vec::with_capacity(total);
    run_bounded(
        jobs.iter().collect::<Vec<_>>(),
        ctx.max_workers,
        |index, job| run_job(index, job, preset_text.as_str(), ctx),
        |index, outcome| {
            let result = outcome.unwrap_or_else(|panic| panicked_result(index, &jobs[index], panic));
            on_progress(BatchProgress {
                completed: results.len() + 1,
                total,
                result: &result,
            });
            results.push(result);
        },
    );

    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let report = BatchReport {
        started_at,
        preset: preset_spec.map(str::to_string),
        image_size: ctx.image_size.to_string(),
        workers,
        total,
        succeeded,
        failed: total - succeeded,
        elapsed_seconds: timer.elapsed().as_secs_f64(),
        results,
    };
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        elapsed_seconds = report.elapsed_seconds,
        "batch complete"
    );
    Ok(report)
}

fn panicked_result(index: usize, job: &Job, message: String) -> JobResult {
    let mut result = JobResult::pending(index, job);
    result.advance(JobState::Running);
    result.finish(Err(JobError::WorkerPanic(message)), 0.0);
    result
}
