use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::pipeline::error::JobError;
use crate::pipeline::postprocess::palette::{quantize_file, Palette};
use crate::pipeline::runtime::{run_checked, CommandSpec, PipelineCommandRunner};

const VTRACER_INLINE_PYTHON: &str = r#"
import argparse

def main():
    parser = argparse.ArgumentParser(description="Trace a raster image to SVG with vtracer")
    parser.add_argument("--input", required=True)
    parser.add_argument("--output", required=True)
    parser.add_argument("--colormode", default="color")
    parser.add_argument("--hierarchical", default="stacked")
    parser.add_argument("--mode", default="spline")
    parser.add_argument("--filter-speckle", type=int, default=4)
    parser.add_argument("--color-precision", type=int, default=6)
    parser.add_argument("--layer-difference", type=int, default=16)
    parser.add_argument("--corner-threshold", type=int, default=60)
    parser.add_argument("--length-threshold", type=float, default=4.0)
    parser.add_argument("--max-iterations", type=int, default=10)
    parser.add_argument("--splice-threshold", type=int, default=45)
    parser.add_argument("--path-precision", type=int, default=8)
    args = parser.parse_args()

    try:
        import vtracer
    except ImportError as exc:
        raise SystemExit(f"vtracer not installed. Install with: pip install vtracer\nOriginal error: {exc}")

    vtracer.convert_image_to_svg_py(
        args.input,
        args.output,
        colormode=args.colormode,
        hierarchical=args.hierarchical,
        mode=args.mode,
        filter_speckle=args.filter_speckle,
        color_precision=args.color_precision,
        layer_difference=args.layer_difference,
        corner_threshold=args.corner_threshold,
        length_threshold=args.length_threshold,
        max_iterations=args.max_iterations,
        splice_threshold=args.splice_threshold,
        path_precision=args.path_precision,
    )

main()
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorMode {
    #[default]
    Color,
    Binary,
}

impl ColorMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Binary => "binary",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "color" => Some(Self::Color),
            "binary" => Some(Self::Binary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Hierarchy {
    #[default]
    Stacked,
    Cutout,
}

impl Hierarchy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stacked => "stacked",
            Self::Cutout => "cutout",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "stacked" => Some(Self::Stacked),
            "cutout" => Some(Self::Cutout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PathMode {
    #[default]
    Spline,
    Polygon,
    None,
}

impl PathMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spline => "spline",
            Self::Polygon => "polygon",
            Self::None => "none",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "spline" => Some(Self::Spline),
            "polygon" => Some(Self::Polygon),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorizeOptions {
    pub color_mode: ColorMode,
    pub hierarchy: Hierarchy,
    pub path_mode: PathMode,
    pub filter_speckle: u32,
    pub color_precision: u32,
    pub layer_difference: u32,
    pub corner_threshold: u32,
    pub length_threshold: f64,
    pub max_iterations: u32,
    pub splice_threshold: u32,
    pub path_precision: u32,
}

impl Default for VectorizeOptions {
    fn default() -> Self {
        Self {
            color_mode: ColorMode::Color,
            hierarchy: Hierarchy::Stacked,
            path_mode: PathMode::Spline,
            filter_speckle: 4,
            color_precision: 6,
            layer_difference: 16,
            corner_threshold: 60,
            length_threshold: 4.0,
            max_iterations: 10,
            splice_threshold: 45,
            path_precision: 8,
        }
    }
}

pub fn build_vtracer_command(
    python_bin: &str,
    input: &Path,
    output: &Path,
    options: &VectorizeOptions,
    cwd: &Path,
) -> CommandSpec {
    let mut args = vec![
        String::from("-c"),
        String::from(VTRACER_INLINE_PYTHON),
        String::from("--input"),
        input.to_string_lossy().to_string(),
        String::from("--output"),
        output.to_string_lossy().to_string(),
        String::from("--colormode"),
        options.color_mode.as_str().to_string(),
        String::from("--hierarchical"),
        options.hierarchy.as_str().to_string(),
        String::from("--mode"),
        options.path_mode.as_str().to_string(),
    ];
    for (flag, value) in [
        ("--filter-speckle", options.filter_speckle.to_string()),
        ("--color-precision", options.color_precision.to_string()),
        ("--layer-difference", options.layer_difference.to_string()),
        ("--corner-threshold", options.corner_threshold.to_string()),
        ("--length-threshold", options.length_threshold.to_string()),
        ("--max-iterations", options.max_iterations.to_string()),
        ("--splice-threshold", options.splice_threshold.to_string()),
        ("--path-precision", options.path_precision.to_string()),
    ] {
        args.push(String::from(flag));
        args.push(value);
    }
    CommandSpec {
        program: python_bin.to_string(),
        args,
        cwd: cwd.to_path_buf(),
    }
}

/// Removes the quantized intermediate when tracing finishes, whatever the
/// outcome.
struct TempRaster(PathBuf);

impl Drop for TempRaster {
    fn drop(&mut self) {
        let _ = fs::remove_file(self.0.as_path());
    }
}

pub fn temp_quantized_path() -> PathBuf {
    std::env::temp_dir().join(format!("imagen_quantized_{}.png", Uuid::new_v4().simple()))
}

/// Traces `input` into `output` (extension forced to `.svg`). With a
/// palette the raster is first quantized into a temporary PNG. The input
/// raster is left in place.
pub fn vectorize(
    runner: &dyn PipelineCommandRunner,
    python_bin: &str,
    input: &Path,
    output: &Path,
    options: &VectorizeOptions,
    palette: Option<&Palette>,
    cwd: &Path,
) -> Result<PathBuf, JobError> {
    if !input.is_file() {
        return Err(JobError::InputNotFound {
            path: input.to_path_buf(),
        });
    }
    let output = output.with_extension("svg");
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| JobError::write_failure(parent, e))?;
    }

    let quantized = match palette {
        Some(palette) => {
            let temp = TempRaster(temp_quantized_path());
            quantize_file(input, temp.0.as_path(), palette)?;
            debug!(palette = palette.name(), colors = palette.colors().len(), "quantized raster");
            Some(temp)
        }
        None => None,
    };
    let trace_input = quantized
        .as_ref()
        .map(|temp| temp.0.as_path())
        .unwrap_or(input);

    run_checked(
        runner,
        &build_vtracer_command(python_bin, trace_input, output.as_path(), options, cwd),
    )?;
    if !output.is_file() {
        return Err(JobError::PostProcess(format!(
            "vtracer did not produce '{}'",
            output.display()
        )));
    }
    debug!(output = %output.display(), mode = options.color_mode.as_str(), "traced svg");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_tracer_tuning() {
        let spec = build_vtracer_command(
            "python3",
            Path::new("in.png"),
            Path::new("out.svg"),
            &VectorizeOptions::default(),
            Path::new("."),
        );
        assert_eq!(
            &spec.args[2..],
            &[
                "--input",
                "in.png",
                "--output",
                "out.svg",
                "--colormode",
                "color",
                "--hierarchical",
                "stacked",
                "--mode",
                "spline",
                "--filter-speckle",
                "4",
                "--color-precision",
                "6",
                "--layer-difference",
                "16",
                "--corner-threshold",
                "60",
                "--length-threshold",
                "4",
                "--max-iterations",
                "10",
                "--splice-threshold",
                "45",
                "--path-precision",
                "8",
            ]
        );
    }

    #[test]
    fn mode_enums_parse_documented_names() {
        assert_eq!(ColorMode::parse("binary"), Some(ColorMode::Binary));
        assert_eq!(Hierarchy::parse("cutout"), Some(Hierarchy::Cutout));
        assert_eq!(PathMode::parse("none"), Some(PathMode::None));
        assert_eq!(PathMode::parse("bezier"), None);
    }

    #[test]
    fn temp_paths_are_unique_pngs() {
        let a = temp_quantized_path();
        let b = temp_quantized_path();
        assert_ne!(a, b);
        assert_eq!(a.extension().and_then(|v| v.to_str()), Some("png"));
    }
}
