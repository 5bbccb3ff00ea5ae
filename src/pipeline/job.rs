use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::pipeline::error::{JobError, JobErrorKind};
use crate::pipeline::persist::{persist_image, SniffedFormat};
use crate::pipeline::presets::compose_prompt;
use crate::pipeline::request::{build_generation_request, load_reference_images};
use crate::pipeline::response::extract_image_data;
use crate::pipeline::runtime::PipelineCommandRunner;
use crate::pipeline::scheduler::BatchContext;
use crate::worker::JobState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub prompt: String,
    pub output: PathBuf,
    pub inputs: Vec<PathBuf>,
}

impl Job {
    pub fn new(prompt: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            output: output.into(),
            inputs: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.inputs = inputs;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub raster_path: PathBuf,
    pub format: SniffedFormat,
    pub final_path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub index: usize,
    pub prompt: String,
    pub requested_output: PathBuf,
    pub status: JobState,
    pub final_path: Option<PathBuf>,
    /// Raster left beside a post-processed final file, e.g. the PNG kept
    /// next to its SVG.
    pub raster_path: Option<PathBuf>,
    pub format: Option<SniffedFormat>,
    pub size_bytes: Option<u64>,
    pub elapsed_seconds: f64,
    pub error: Option<String>,
    pub error_kind: Option<JobErrorKind>,
}

impl JobResult {
    pub fn pending(index: usize, job: &Job) -> Self {
        Self {
            index,
            prompt: job.prompt.clone(),
            requested_output: job.output.clone(),
            status: JobState::Pending,
            final_path: None,
            raster_path: None,
            format: None,
            size_bytes: None,
            elapsed_seconds: 0.0,
            error: None,
            error_kind: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobState::Succeeded
    }

    /// Moves to `next` when the state machine allows it. Returns whether the
    /// transition happened.
    pub fn advance(&mut self, next: JobState) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                index = self.index,
                from = self.status.as_str(),
                to = next.as_str(),
                "ignored invalid job state transition"
            );
            return false;
        }
        self.status = next;
        true
    }

    /// Finalizes a running result. A result that is already terminal is left
    /// untouched.
    pub fn finish(&mut self, outcome: Result<JobOutcome, JobError>, elapsed_seconds: f64) {
        let next = if outcome.is_ok() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        if !self.advance(next) {
            return;
        }
        self.elapsed_seconds = elapsed_seconds;
        match outcome {
            Ok(outcome) => {
                self.raster_path = Some(outcome.raster_path)
                    .filter(|raster| raster != &outcome.final_path && raster.is_file());
                self.format = Some(outcome.format);
                self.final_path = Some(outcome.final_path);
                self.size_bytes = Some(outcome.size_bytes);
            }
            Err(err) => {
                self.error_kind = Some(err.kind());
                self.error = Some(err.to_string());
            }
        }
    }
}

/// Runs the full chain for one job: reference images, prompt composition,
/// request, generation, extraction, persistence and post-processing.
pub fn process_job<R: PipelineCommandRunner>(
    job: &Job,
    preset_text: &str,
    ctx: &BatchContext<R>,
) -> Result<JobOutcome, JobError> {
    let references = load_reference_images(job.inputs.as_slice())?;
    let prompt = compose_prompt(preset_text, job.prompt.as_str());
    let request = build_generation_request(prompt.as_str(), ctx.image_size, references.as_slice());
    debug!(output = %job.output.display(), references = references.len(), "requesting image");

    let response = ctx.client.generate(&request)?;
    let image_data = extract_image_data(&response)?;
    let persisted = persist_image(image_data.as_str(), job.output.as_path(), ctx.unique_names)?;

    let final_path = if ctx.post_processor.options().is_noop() {
        persisted.path.clone()
    } else {
        ctx.post_processor.run(persisted.path.as_path())?
    };

    let size_bytes = fs::metadata(final_path.as_path())
        .map_err(|e| JobError::write_failure(final_path.as_path(), e))?
        .len();
    if size_bytes == 0 {
        return Err(JobError::write_failure(
            final_path.as_path(),
            "output file is empty",
        ));
    }

    Ok(JobOutcome {
        raster_path: persisted.path,
        format: persisted.format,
        final_path,
        size_bytes,
    })
}

pub fn run_job<R: PipelineCommandRunner>(
    index: usize,
    job: &Job,
    preset_text: &str,
    ctx: &BatchContext<R>,
) -> JobResult {
    let mut result = JobResult::pending(index, job);
    result.advance(JobState::Running);
    let started = Instant::now();
    let outcome = process_job(job, preset_text, ctx);
    result.finish(outcome, started.elapsed().as_secs_f64());
    result
}
