use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use imagen_pipeline_core::pipeline::batch::{is_batch_file_arg, load_batch_file, parse_cli_jobs};
use imagen_pipeline_core::pipeline::client::GeminiClient;
use imagen_pipeline_core::pipeline::job::{process_job, Job};
use imagen_pipeline_core::pipeline::persist::format_size;
use imagen_pipeline_core::pipeline::postprocess::palette::{palette_for_presets, Palette, PALETTE_NAMES};
use imagen_pipeline_core::pipeline::postprocess::vectorize::{
    vectorize, ColorMode, Hierarchy, PathMode, VectorizeOptions,
};
use imagen_pipeline_core::pipeline::postprocess::{
    PostProcessOptions, PostProcessor, SvgOutput, ToolSettings,
};
use imagen_pipeline_core::pipeline::presets::{compose_prompt, PresetResolver};
use imagen_pipeline_core::pipeline::runlog::{resolve_report_path, write_batch_report};
use imagen_pipeline_core::pipeline::runtime::{default_builtin_presets_dir, StdPipelineCommandRunner};
use imagen_pipeline_core::pipeline::scheduler::{run_batch, BatchContext, BatchProgress};
use imagen_pipeline_core::pipeline::settings::{
    load_pipeline_settings, parse_number, PipelineSettings, SettingsOverlay,
};
use imagen_pipeline_core::worker::effective_worker_count;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() -> CliResult<ExitCode> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let rest = cli_args.iter().skip(1).cloned().collect::<Vec<_>>();
    match cli_args.first().map(String::as_str) {
        Some("generate") => run_generate_cli(rest),
        Some("batch") => run_batch_cli(rest),
        Some("presets") => run_presets_cli(rest),
        Some("svg") => run_svg_cli(rest),
        None | Some("-h") | Some("--help") | Some("help") => {
            print_usage();
            Ok(ExitCode::SUCCESS)
        }
        Some(unknown) => Err(std::io::Error::other(format!(
            "Unknown command: {unknown}\n\nUse --help for usage."
        ))
        .into()),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Default)]
struct PostProcessCliArgs {
    remove_bg: bool,
    remove_white_bg: bool,
    white_threshold: Option<u8>,
    output_svg: bool,
    svg_mode: ColorMode,
    svg_palette: Option<String>,
}

impl PostProcessCliArgs {
    /// Consumes one post-processing flag at `args[i]`. Returns how many
    /// arguments were used, or `None` when the flag is not a post flag.
    fn take_flag(&mut self, args: &[String], i: usize) -> CliResult<Option<usize>> {
        let flag = args[i].as_str();
        match flag {
            "--remove-bg" | "-r" => self.remove_bg = true,
            "--remove-white-bg" => self.remove_white_bg = true,
            "--output-svg" | "-s" => self.output_svg = true,
            "--white-threshold" => {
                self.white_threshold = Some(parse_number(needs_value(args, i)?.as_str(), flag)?);
                return Ok(Some(2));
            }
            "--svg-mode" => {
                let raw = needs_value(args, i)?;
                self.svg_mode = ColorMode::parse(raw.as_str())
                    .ok_or_else(|| invalid_choice(flag, raw.as_str(), "color|binary"))?;
                return Ok(Some(2));
            }
            "--svg-palette" => {
                self.svg_palette = Some(needs_value(args, i)?);
                return Ok(Some(2));
            }
            _ => return Ok(None),
        }
        Ok(Some(1))
    }

    /// SVG output always quantizes; the palette comes from `--svg-palette`
    /// or the first project preset.
    fn to_options(&self, preset: Option<&str>, settings: &PipelineSettings) -> PostProcessOptions {
        let svg = self.output_svg.then(|| {
            let palette_name = self
                .svg_palette
                .clone()
                .or_else(|| preset.and_then(palette_for_presets));
            SvgOutput {
                options: VectorizeOptions {
                    color_mode: self.svg_mode,
                    ..VectorizeOptions::default()
                },
                palette: Some(Palette::named_or_default(palette_name.as_deref())),
            }
        });
        PostProcessOptions {
            remove_bg: self.remove_bg,
            remove_white_bg: self.remove_white_bg,
            white_threshold: self.white_threshold.unwrap_or(settings.white_threshold),
            svg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
struct CommonCliArgs {
    preset: Option<String>,
    config: Option<String>,
    overlay: SettingsOverlay,
}

impl CommonCliArgs {
    fn take_flag(&mut self, args: &[String], i: usize) -> CliResult<Option<usize>> {
        let flag = args[i].as_str();
        match flag {
            "--preset" | "-p" => self.preset = Some(needs_value(args, i)?),
            "--size" => self.overlay.image_size = Some(needs_value(args, i)?),
            "--model" | "-m" => self.overlay.model = Some(needs_value(args, i)?),
            "--config" => self.config = Some(needs_value(args, i)?),
            "--presets-dir" => self.overlay.presets_dir = Some(needs_value(args, i)?),
            "--timeout" => {
                self.overlay.timeout_secs =
                    Some(parse_number(needs_value(args, i)?.as_str(), flag)?)
            }
            _ => return Ok(None),
        }
        Ok(Some(2))
    }

    fn load_settings(&self, cwd: &Path) -> CliResult<PipelineSettings> {
        Ok(load_pipeline_settings(cwd, self.config.as_deref(), &self.overlay)?)
    }

    fn preset_spec(&self) -> Option<&str> {
        self.preset
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
struct GenerateCliArgs {
    common: CommonCliArgs,
    post: PostProcessCliArgs,
    inputs: Vec<PathBuf>,
    keep_name: bool,
    show_prompt: bool,
    prompt: String,
    output: PathBuf,
}

fn parse_generate_cli_args(args: &[String]) -> CliResult<GenerateCliArgs> {
    let mut parsed = GenerateCliArgs::default();
    let mut positional = Vec::new();
    let mut i = 0usize;
    while i < args.len() {
        if let Some(used) = parsed.common.take_flag(args, i)? {
            i += used;
            continue;
        }
        if let Some(used) = parsed.post.take_flag(args, i)? {
            i += used;
            continue;
        }
        match args[i].as_str() {
            "-w" => {
                parsed.post.remove_white_bg = true;
                i += 1;
            }
            "--input" | "-i" => {
                parsed.inputs.push(PathBuf::from(needs_value(args, i)?));
                i += 2;
            }
            "--keep-name" => {
                parsed.keep_name = true;
                i += 1;
            }
            "--show-prompt" => {
                parsed.show_prompt = true;
                i += 1;
            }
            unknown if unknown.starts_with('-') && unknown.len() > 1 => {
                return Err(unknown_argument(unknown));
            }
            value => {
                positional.push(value.to_string());
                i += 1;
            }
        }
    }

    match positional.as_slice() {
        [prompt] if parsed.show_prompt => parsed.prompt = prompt.clone(),
        [prompt, output] => {
            parsed.prompt = prompt.clone();
            parsed.output = PathBuf::from(output);
        }
        _ => {
            return Err(std::io::Error::other(
                "generate expects <prompt> <output>\n\nUse --help for usage.",
            )
            .into())
        }
    }
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq, Default)]
struct BatchCliArgs {
    common: CommonCliArgs,
    post: PostProcessCliArgs,
    report: Option<PathBuf>,
    keep_name: bool,
    inputs: Vec<String>,
}

fn parse_batch_cli_args(args: &[String]) -> CliResult<BatchCliArgs> {
    let mut parsed = BatchCliArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        if let Some(used) = parsed.common.take_flag(args, i)? {
            i += used;
            continue;
        }
        if let Some(used) = parsed.post.take_flag(args, i)? {
            i += used;
            continue;
        }
        let flag = args[i].as_str();
        match flag {
            "--workers" | "-w" => {
                parsed.common.overlay.workers =
                    Some(parse_number(needs_value(args, i)?.as_str(), flag)?);
                i += 2;
            }
            "--report" => {
                parsed.report = Some(PathBuf::from(needs_value(args, i)?));
                i += 2;
            }
            "--keep-name" => {
                parsed.keep_name = true;
                i += 1;
            }
            unknown if unknown.starts_with('-') && unknown.len() > 1 => {
                return Err(unknown_argument(unknown));
            }
            value => {
                parsed.inputs.push(value.to_string());
                i += 1;
            }
        }
    }
    if parsed.inputs.is_empty() {
        return Err(std::io::Error::other(
            "batch expects a jobs .json file or prompt/output pairs\n\nUse --help for usage.",
        )
        .into());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq, Default)]
struct SvgCliArgs {
    options: VectorizeOptions,
    logo_preset: bool,
    palette: Option<String>,
    python_bin: Option<String>,
    config: Option<String>,
    input: PathBuf,
    output: PathBuf,
}

fn parse_svg_cli_args(args: &[String]) -> CliResult<SvgCliArgs> {
    let mut parsed = SvgCliArgs::default();
    let mut positional = Vec::new();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        if !flag.starts_with("--") && flag != "-m" {
            positional.push(flag.to_string());
            i += 1;
            continue;
        }
        let value = needs_value(args, i)?;
        let opts = &mut parsed.options;
        match flag {
            "--svg-mode" | "-m" => {
                opts.color_mode = ColorMode::parse(value.as_str())
                    .ok_or_else(|| invalid_choice(flag, value.as_str(), "color|binary"))?
            }
            "--hierarchical" => {
                opts.hierarchy = Hierarchy::parse(value.as_str())
                    .ok_or_else(|| invalid_choice(flag, value.as_str(), "stacked|cutout"))?
            }
            "--path-mode" => {
                opts.path_mode = PathMode::parse(value.as_str())
                    .ok_or_else(|| invalid_choice(flag, value.as_str(), "spline|polygon|none"))?
            }
            "--svg-preset" => {
                if value != "logo" {
                    return Err(invalid_choice(flag, value.as_str(), "logo"));
                }
                parsed.logo_preset = true;
            }
            "--svg-palette" => {
                if !PALETTE_NAMES.contains(&value.as_str()) {
                    return Err(invalid_choice(flag, value.as_str(), PALETTE_NAMES.join("|").as_str()));
                }
                parsed.palette = Some(value);
            }
            "--python" => parsed.python_bin = Some(value),
            "--config" => parsed.config = Some(value),
            "--filter-speckle" => opts.filter_speckle = parse_number(value.as_str(), flag)?,
            "--color-precision" => opts.color_precision = parse_number(value.as_str(), flag)?,
            "--layer-difference" => opts.layer_difference = parse_number(value.as_str(), flag)?,
            "--corner-threshold" => opts.corner_threshold = parse_number(value.as_str(), flag)?,
            "--length-threshold" => opts.length_threshold = parse_number(value.as_str(), flag)?,
            "--max-iterations" => opts.max_iterations = parse_number(value.as_str(), flag)?,
            "--splice-threshold" => opts.splice_threshold = parse_number(value.as_str(), flag)?,
            "--path-precision" => opts.path_precision = parse_number(value.as_str(), flag)?,
            unknown => return Err(unknown_argument(unknown)),
        }
        i += 2;
    }

    let [input, output] = positional.as_slice() else {
        return Err(std::io::Error::other("svg expects <input> <output>\n\nUse --help for usage.").into());
    };
    parsed.input = PathBuf::from(input);
    parsed.output = PathBuf::from(output);
    Ok(parsed)
}

fn run_generate_cli(args: Vec<String>) -> CliResult<ExitCode> {
    if wants_help(args.as_slice()) {
        print_usage();
        return Ok(ExitCode::SUCCESS);
    }
    let parsed = parse_generate_cli_args(args.as_slice())?;
    let cwd = std::env::current_dir()?;
    let settings = parsed.common.load_settings(cwd.as_path())?;
    let presets = preset_resolver(cwd.as_path(), &settings);
    let preset_spec = parsed.common.preset_spec();
    let preset_text = match preset_spec {
        Some(spec) => presets.resolve(spec)?,
        None => String::new(),
    };

    if parsed.show_prompt {
        println!("{}", compose_prompt(preset_text.as_str(), parsed.prompt.as_str()));
        return Ok(ExitCode::SUCCESS);
    }

    let post = parsed.post.to_options(preset_spec, &settings);
    let mut ctx = batch_context(cwd.as_path(), &settings, presets, post)?;
    ctx.unique_names = !parsed.keep_name;

    let job = Job::new(parsed.prompt.as_str(), parsed.output.as_path()).with_inputs(parsed.inputs);
    println!("Generating image...");
    println!("  Model: {}", settings.model);
    println!("  Size: {}", settings.image_size);
    if let Some(spec) = preset_spec {
        println!("  Preset: {spec}");
    }
    match process_job(&job, preset_text.as_str(), &ctx) {
        Ok(outcome) => {
            println!("Success! Image generated.");
            println!("File: {}", outcome.final_path.display());
            if outcome.raster_path != outcome.final_path && outcome.raster_path.is_file() {
                println!(
                    "Raster: {} ({})",
                    outcome.raster_path.display(),
                    outcome.format.extension()
                );
            }
            println!("Size: {}", format_size(outcome.size_bytes));
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("Error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_batch_cli(args: Vec<String>) -> CliResult<ExitCode> {
    if wants_help(args.as_slice()) {
        print_usage();
        return Ok(ExitCode::SUCCESS);
    }
    let parsed = parse_batch_cli_args(args.as_slice())?;
    let cwd = std::env::current_dir()?;
    let settings = parsed.common.load_settings(cwd.as_path())?;

    let (jobs, file_preset) = if is_batch_file_arg(parsed.inputs.as_slice()) {
        let spec = load_batch_file(Path::new(parsed.inputs[0].as_str()))?;
        (spec.jobs, spec.preset)
    } else {
        (parse_cli_jobs(parsed.inputs.as_slice())?, None)
    };
    // An explicit --preset replaces the file's preset.
    let preset_spec = parsed
        .common
        .preset_spec()
        .map(str::to_string)
        .or(file_preset);

    let post = parsed.post.to_options(preset_spec.as_deref(), &settings);
    let presets = preset_resolver(cwd.as_path(), &settings);
    let mut ctx = batch_context(cwd.as_path(), &settings, presets, post)?;
    ctx.max_workers = settings.workers;
    ctx.unique_names = !parsed.keep_name;

    println!(
        "Batch: {} jobs, {} workers",
        jobs.len(),
        effective_worker_count(settings.workers, jobs.len())
    );
    println!("Model: {}, Size: {}", settings.model, settings.image_size);
    if let Some(spec) = preset_spec.as_deref() {
        println!("Preset: {spec}");
    }
    println!();

    let report = run_batch(jobs.as_slice(), preset_spec.as_deref(), &ctx, print_progress)?;

    println!();
    println!(
        "Batch complete: {} succeeded, {} failed",
        report.succeeded, report.failed
    );
    println!("Total time: {:.1}s", report.elapsed_seconds);
    if let Some(requested) = parsed.report.as_deref() {
        let path = resolve_report_path(requested);
        write_batch_report(path.as_path(), &report)?;
        println!("Report: {}", path.display());
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_progress(progress: BatchProgress<'_>) {
    let result = progress.result;
    let prefix = format!("[{}/{}]", progress.completed, progress.total);
    match (result.final_path.as_deref(), result.size_bytes) {
        (Some(path), Some(size)) if result.is_success() => println!(
            "{prefix} ✓ {} ({}, {:.1}s)",
            path.display(),
            format_size(size),
            result.elapsed_seconds
        ),
        _ => println!(
            "{prefix} ✗ {} - ERROR: {}",
            result.requested_output.display(),
            result.error.as_deref().unwrap_or("Unknown")
        ),
    }
}

fn run_presets_cli(args: Vec<String>) -> CliResult<ExitCode> {
    if wants_help(args.as_slice()) {
        print_usage();
        return Ok(ExitCode::SUCCESS);
    }
    let mut common = CommonCliArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        match common.take_flag(args.as_slice(), i)? {
            Some(used) => i += used,
            None => return Err(unknown_argument(args[i].as_str())),
        }
    }
    let cwd = std::env::current_dir()?;
    let settings = common.load_settings(cwd.as_path())?;
    let resolver = preset_resolver(cwd.as_path(), &settings);

    let listing = resolver.list()?;
    if listing.is_empty() {
        println!("No presets found.");
        return Ok(ExitCode::SUCCESS);
    }
    let mut current_dir = None::<&Path>;
    for preset in listing.iter() {
        if current_dir != Some(preset.dir.as_path()) {
            println!("\n{}:", preset.dir.display());
            current_dir = Some(preset.dir.as_path());
        }
        println!("  {:<20} {}", preset.name, preset.description);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_svg_cli(args: Vec<String>) -> CliResult<ExitCode> {
    if wants_help(args.as_slice()) {
        print_usage();
        return Ok(ExitCode::SUCCESS);
    }
    let parsed = parse_svg_cli_args(args.as_slice())?;
    let cwd = std::env::current_dir()?;
    let settings = load_pipeline_settings(
        cwd.as_path(),
        parsed.config.as_deref(),
        &SettingsOverlay {
            python_bin: parsed.python_bin.clone(),
            ..SettingsOverlay::default()
        },
    )?;
    let palette = (parsed.logo_preset || parsed.palette.is_some())
        .then(|| Palette::named_or_default(parsed.palette.as_deref()));

    println!("Converting to SVG...");
    println!("  Input: {}", parsed.input.display());
    println!("  Mode: {}", parsed.options.color_mode.as_str());
    if let Some(palette) = palette.as_ref() {
        println!("  Quantizing to {} colors...", palette.colors().len());
    }
    let svg_path = vectorize(
        &StdPipelineCommandRunner,
        settings.python_bin.as_str(),
        parsed.input.as_path(),
        parsed.output.as_path(),
        &parsed.options,
        palette.as_ref(),
        cwd.as_path(),
    )?;
    let size = std::fs::metadata(svg_path.as_path())?.len();
    println!("  Output: {} ({})", svg_path.display(), format_size(size));
    Ok(ExitCode::SUCCESS)
}

fn preset_resolver(cwd: &Path, settings: &PipelineSettings) -> PresetResolver {
    let builtin = default_builtin_presets_dir();
    PresetResolver::with_search_order(cwd, settings.presets_dir.as_deref(), Some(builtin.as_path()))
}

fn batch_context(
    cwd: &Path,
    settings: &PipelineSettings,
    presets: PresetResolver,
    post: PostProcessOptions,
) -> CliResult<BatchContext> {
    let client = GeminiClient::new(settings.client_config()?)?;
    let mut ctx = BatchContext::new(
        presets,
        Arc::new(client),
        PostProcessor::new(
            StdPipelineCommandRunner,
            ToolSettings {
                python_bin: settings.python_bin.clone(),
                rembg_model: settings.rembg_model.clone(),
                cwd: cwd.to_path_buf(),
            },
            post,
        ),
    );
    ctx.image_size = settings.image_size;
    Ok(ctx)
}

fn needs_value(args: &[String], idx: usize) -> CliResult<String> {
    let Some(value) = args.get(idx + 1) else {
        return Err(std::io::Error::other(format!("Missing value for {}", args[idx])).into());
    };
    Ok(value.clone())
}

fn unknown_argument(arg: &str) -> Box<dyn std::error::Error> {
    std::io::Error::other(format!("Unknown argument: {arg}\n\nUse --help for usage.")).into()
}

fn invalid_choice(flag: &str, value: &str, expected: &str) -> Box<dyn std::error::Error> {
    std::io::Error::other(format!("invalid value '{value}' for {flag}. Expected {expected}.")).into()
}

fn wants_help(args: &[String]) -> bool {
    args.iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
}

fn print_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  imagen generate [options] <prompt> <output>\n",
        "  imagen batch [options] (<jobs.json> | <prompt> <output> [<prompt> <output> ...])\n",
        "  imagen presets\n",
        "  imagen svg [tracer options] <input> <output>\n\n",
        "Common options:\n",
        "  --preset, -p LIST     comma separated preset names\n",
        "  --size 512|1K|2K      output size (default 1K, env IMAGE_SIZE)\n",
        "  --model, -m ID        model id (env GEMINI_MODEL)\n",
        "  --config PATH         settings file (default config/imagen.settings.toml)\n",
        "  --presets-dir PATH    extra preset directory (env IMAGEN_PRESETS_DIR)\n",
        "  --timeout SECS        request timeout (default 120)\n\n",
        "Post-processing (generate, batch):\n",
        "  --remove-bg, -r       ML background removal with rembg\n",
        "  --remove-white-bg     luminosity based white background removal (-w in generate)\n",
        "  --white-threshold N   luminosity threshold (default 240)\n",
        "  --output-svg, -s      trace the result to SVG\n",
        "  --svg-mode MODE       color|binary\n",
        "  --svg-palette NAME    palette for quantization (default: first project preset)\n",
        "  --keep-name           do not add a unique suffix to output names\n\n",
        "generate only:\n",
        "  --input, -i PATH      reference image (repeatable)\n",
        "  --show-prompt         print the composed prompt and exit\n\n",
        "batch only:\n",
        "  --workers, -w N       parallel workers (default 4)\n",
        "  --report PATH|DIR/    write the batch report as JSON\n\n",
        "svg options:\n",
        "  --svg-mode, -m, --hierarchical stacked|cutout, --path-mode spline|polygon|none,\n",
        "  --svg-preset logo, --svg-palette manito, --filter-speckle, --color-precision,\n",
        "  --layer-difference, --corner-threshold, --length-threshold, --max-iterations,\n",
        "  --splice-threshold, --path-precision, --python BIN, --config PATH\n\n",
        "Requires GEMINI_API_KEY (environment, .env or config/imagen.settings.toml).\n"
    ));
}
