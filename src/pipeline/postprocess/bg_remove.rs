use std::fs;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use tracing::debug;

use crate::pipeline::error::JobError;
use crate::pipeline::runtime::{run_checked, CommandSpec, PipelineCommandRunner};

pub const DEFAULT_WHITE_THRESHOLD: u8 = 240;
pub const DEFAULT_REMBG_MODEL: &str = "u2net";

const REMBG_INLINE_PYTHON: &str = r#"
import argparse
from pathlib import Path

def fail(message: str) -> None:
    raise SystemExit(message)

def main():
    parser = argparse.ArgumentParser(description="Remove image background with rembg")
    parser.add_argument("--input", required=True)
    parser.add_argument("--output", required=True)
    parser.add_argument("--model", default="u2net")
    args = parser.parse_args()

    input_path = Path(args.input).resolve()
    output_path = Path(args.output).resolve()
    if not input_path.is_file():
        fail(f"Input file not found: {input_path}")

    try:
        from rembg import remove, new_session
    except Exception as exc:
        fail(f"rembg not installed. Install with: pip install rembg\nOriginal error: {exc}")

    data = input_path.read_bytes()
    out_bytes = remove(data, session=new_session(args.model))
    output_path.parent.mkdir(parents=True, exist_ok=True)
    output_path.write_bytes(out_bytes)

main()
"#;

pub fn build_rembg_command(
    python_bin: &str,
    model: &str,
    input: &Path,
    output: &Path,
    cwd: &Path,
) -> CommandSpec {
    CommandSpec {
        program: python_bin.to_string(),
        args: vec![
            String::from("-c"),
            String::from(REMBG_INLINE_PYTHON),
            String::from("--input"),
            input.to_string_lossy().to_string(),
            String::from("--output"),
            output.to_string_lossy().to_string(),
            String::from("--model"),
            model.to_string(),
        ],
        cwd: cwd.to_path_buf(),
    }
}

/// Segments the subject with rembg. The result is always a PNG next to the
/// input; the input is removed when the paths differ.
pub fn remove_background_ml(
    runner: &dyn PipelineCommandRunner,
    python_bin: &str,
    model: &str,
    input: &Path,
    cwd: &Path,
) -> Result<PathBuf, JobError> {
    let output = input.with_extension("png");
    run_checked(
        runner,
        &build_rembg_command(python_bin, model, input, output.as_path(), cwd),
    )?;
    if !output.is_file() {
        return Err(JobError::PostProcess(format!(
            "rembg did not produce '{}'",
            output.display()
        )));
    }
    replace_original(input, output.as_path())?;
    debug!(output = %output.display(), "removed background with rembg");
    Ok(output)
}

pub fn luminosity(r: u8, g: u8, b: u8) -> f32 {
    0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)
}

/// Pixels brighter than `threshold` become fully transparent, everything
/// else fully opaque.
pub fn apply_luminosity_alpha(image: &mut RgbaImage, threshold: u8) {
    let limit = f32::from(threshold);
    for pixel in image.pixels_mut() {
        pixel[3] = if luminosity(pixel[0], pixel[1], pixel[2]) > limit {
            0
        } else {
            255
        };
    }
}

pub fn remove_white_background(input: &Path, threshold: u8) -> Result<PathBuf, JobError> {
    let mut image = image::open(input)
        .map_err(|e| JobError::PostProcess(format!("open '{}': {e}", input.display())))?
        .to_rgba8();
    apply_luminosity_alpha(&mut image, threshold);

    let output = input.with_extension("png");
    image
        .save_with_format(output.as_path(), image::ImageFormat::Png)
        .map_err(|e| JobError::write_failure(output.as_path(), e))?;
    replace_original(input, output.as_path())?;
    debug!(output = %output.display(), threshold, "removed white background");
    Ok(output)
}

fn replace_original(input: &Path, output: &Path) -> Result<(), JobError> {
    if input != output && input.exists() {
        fs::remove_file(input).map_err(|e| JobError::write_failure(input, e))?;
    }
    Ok(())
}
