pub mod bg_remove;
pub mod palette;
pub mod vectorize;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::pipeline::error::JobError;
use crate::pipeline::runtime::{PipelineCommandRunner, StdPipelineCommandRunner};

use self::bg_remove::{DEFAULT_REMBG_MODEL, DEFAULT_WHITE_THRESHOLD};
use self::palette::Palette;
use self::vectorize::VectorizeOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundRemoval {
    Ml,
    Luminosity { threshold: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SvgOutput {
    pub options: VectorizeOptions,
    pub palette: Option<Palette>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessOptions {
    pub remove_bg: bool,
    pub remove_white_bg: bool,
    pub white_threshold: u8,
    pub svg: Option<SvgOutput>,
}

impl Default for PostProcessOptions {
    fn default() -> Self {
        Self {
            remove_bg: false,
            remove_white_bg: false,
            white_threshold: DEFAULT_WHITE_THRESHOLD,
            svg: None,
        }
    }
}

impl PostProcessOptions {
    /// ML removal wins when both removal modes are requested.
    pub fn background_removal(&self) -> Option<BackgroundRemoval> {
        if self.remove_bg {
            Some(BackgroundRemoval::Ml)
        } else if self.remove_white_bg {
            Some(BackgroundRemoval::Luminosity {
                threshold: self.white_threshold,
            })
        } else {
            None
        }
    }

    pub fn is_noop(&self) -> bool {
        self.background_removal().is_none() && self.svg.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSettings {
    pub python_bin: String,
    pub rembg_model: String,
    pub cwd: PathBuf,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            python_bin: String::from("python3"),
            rembg_model: String::from(DEFAULT_REMBG_MODEL),
            cwd: PathBuf::from("."),
        }
    }
}

pub struct PostProcessor<R: PipelineCommandRunner = StdPipelineCommandRunner> {
    runner: R,
    tools: ToolSettings,
    options: PostProcessOptions,
}

impl<R: PipelineCommandRunner> PostProcessor<R> {
    pub fn new(runner: R, tools: ToolSettings, options: PostProcessOptions) -> Self {
        Self {
            runner,
            tools,
            options,
        }
    }

    pub fn options(&self) -> &PostProcessOptions {
        &self.options
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs the configured stages on a persisted raster and returns the
    /// path of the final artifact.
    pub fn run(&self, raster: &Path) -> Result<PathBuf, JobError> {
        let mut current = raster.to_path_buf();
        match self.options.background_removal() {
            Some(BackgroundRemoval::Ml) => {
                current = bg_remove::remove_background_ml(
                    &self.runner,
                    self.tools.python_bin.as_str(),
                    self.tools.rembg_model.as_str(),
                    current.as_path(),
                    self.tools.cwd.as_path(),
                )?;
            }
            Some(BackgroundRemoval::Luminosity { threshold }) => {
                current = bg_remove::remove_white_background(current.as_path(), threshold)?;
            }
            None => {}
        }

        if let Some(svg) = self.options.svg.as_ref() {
            let output = current.with_extension("svg");
            current = vectorize::vectorize(
                &self.runner,
                self.tools.python_bin.as_str(),
                current.as_path(),
                output.as_path(),
                &svg.options,
                svg.palette.as_ref(),
                self.tools.cwd.as_path(),
            )?;
        }
        debug!(path = %current.display(), "post-processing finished");
        Ok(current)
    }
}
