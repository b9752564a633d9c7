//! CLI binary for launcher-client.
//!
//! A thin shim over the library crate: each subcommand drives one tool
//! session against a running launcher server and prints the same statistics
//! the web front end shows.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use launcher_client::presenter::{completion_stats, gif_size_label};
use launcher_client::{
    AspectMode, ClientConfig, ConversionRequest, ExportFormat, GifOptions, ImageSizer, Progress,
    ResizeMode, SourceFile, TaskController, TaskId, TaskObserver, TaskOutcome, TaskState, Tool,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI task observer using indicatif ────────────────────────────────────────

/// Renders a conversion task in the terminal.
///
/// Starts as a spinner. Document conversion switches to a percentage bar on
/// the first progress event that carries a page count; GIF conversion only
/// reports status lines, so it stays a pulsing spinner throughout.
struct CliObserver {
    bar: ProgressBar,
    stepped: bool,
}

impl CliObserver {
    fn new(tool: Tool) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            stepped: tool.reports_steps(),
        })
    }

    fn activate_bar(&self) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(100);
        self.bar.set_style(style);
    }
}

impl TaskObserver for CliObserver {
    fn on_state_change(&self, task_id: Option<&TaskId>, _from: TaskState, to: TaskState) {
        match to {
            TaskState::Uploading => {
                self.bar.set_prefix("Uploading");
                self.bar.set_message("sending file…");
            }
            TaskState::Streaming if self.bar.prefix() != "Converting" => {
                self.bar.set_prefix("Converting");
                if let Some(id) = task_id {
                    self.bar.println(format!("{} task {}", cyan("◆"), dim(id.as_str())));
                }
            }
            TaskState::Failed => self.bar.finish_and_clear(),
            _ => {}
        }
    }

    fn on_progress(&self, progress: &Progress) {
        if let (true, Some(pct)) = (self.stepped, progress.percent()) {
            if self.bar.length() != Some(100) {
                self.activate_bar();
            }
            self.bar.set_position(pct as u64);
        }
        if let Some(status) = &progress.status {
            self.bar.set_message(status.clone());
        }
    }

    fn on_error(&self, message: &str) {
        self.bar.println(format!("  {} {}", red("✗"), red(message)));
    }

    fn on_complete(&self, _outcome: &TaskOutcome) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # List the available tools
  launcher tools

  # Resize to 1200 px wide at quality 80 and export as JPEG
  launcher resize photo.jpg --width 1200 --quality 80 -o out/

  # Fit a 1080x1080 preset, then let the server pick quality for 300 KB
  launcher resize photo.jpg --preset 1080,1080,85 --target-kb 300 --auto-adjust

  # Convert a PDF and print the Markdown
  launcher pdf2md paper.pdf --show-markdown

  # 3-second GIF at most 2 MB, cropped to 480x480
  launcher vid2gif clip.mp4 --duration 3 --target-size-mb 2 --aspect crop --width 480 --height 480

ENVIRONMENT VARIABLES:
  LAUNCHER_URL        Server origin (default http://127.0.0.1:5000)
  LAUNCHER_TIMEOUT    Request timeout in seconds
  RUST_LOG            Overrides the log filter
"#;

/// Drive the tool launcher's image, document and video tools from a terminal.
#[derive(Parser, Debug)]
#[command(
    name = "launcher",
    version,
    about = "Drive the tool launcher's image, document and video tools from a terminal",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Launcher server origin.
    #[arg(long, global = true, env = "LAUNCHER_URL", default_value = "http://127.0.0.1:5000")]
    server: String,

    /// Request timeout in seconds (progress streams are not limited).
    #[arg(long, global = true, env = "LAUNCHER_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Preview debounce window in milliseconds.
    #[arg(long, global = true, env = "LAUNCHER_DEBOUNCE_MS", default_value_t = 200)]
    debounce_ms: u64,

    /// Disable progress bar.
    #[arg(long, global = true, env = "LAUNCHER_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "LAUNCHER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "LAUNCHER_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the tools the launcher serves.
    Tools,

    /// Resize and compress an image.
    Resize {
        /// Image file to upload.
        file: PathBuf,

        /// Output width in pixels.
        #[arg(long)]
        width: Option<u32>,

        /// Output height in pixels.
        #[arg(long)]
        height: Option<u32>,

        /// Unlock the aspect ratio so width and height are independent.
        #[arg(long)]
        unlock: bool,

        /// How to fit an unlocked box: stretch, fit or crop.
        #[arg(long, value_enum, default_value = "stretch")]
        mode: ModeArg,

        /// JPEG quality (1–100).
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: Option<u8>,

        /// Preset as WIDTH,HEIGHT,QUALITY (e.g. 1920,1080,85).
        #[arg(long, value_parser = parse_preset)]
        preset: Option<(u32, u32, u8)>,

        /// Target output size in KB.
        #[arg(long)]
        target_kb: Option<u32>,

        /// Ask the server for parameters that hit --target-kb.
        #[arg(long)]
        auto_adjust: bool,

        /// Export format.
        #[arg(long, value_enum, default_value = "jpeg")]
        format: FormatArg,

        /// File or directory to write the exported image to.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert a PDF to Markdown.
    Pdf2md {
        /// PDF file to upload.
        file: PathBuf,

        /// File or directory to write the Markdown to.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the converted Markdown to stdout.
        #[arg(long)]
        show_markdown: bool,
    },

    /// Convert a video clip to an animated GIF.
    Vid2gif {
        /// Video file to upload.
        file: PathBuf,

        /// Maximum GIF duration in seconds.
        #[arg(long, default_value_t = 5.0)]
        duration: f64,

        /// Target GIF size in MB.
        #[arg(long, default_value_t = 5.0)]
        target_size_mb: f64,

        /// Aspect handling: maintain, crop or fill.
        #[arg(long, value_enum, default_value = "maintain")]
        aspect: AspectArg,

        /// Output width; keeps the source dimensions when neither size is set.
        #[arg(long)]
        width: Option<u32>,

        /// Output height.
        #[arg(long)]
        height: Option<u32>,

        /// File or directory to write the GIF to.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Stretch,
    Fit,
    Crop,
}

impl From<ModeArg> for ResizeMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Stretch => ResizeMode::Stretch,
            ModeArg::Fit => ResizeMode::Fit,
            ModeArg::Crop => ResizeMode::Crop,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    Png,
}

impl From<FormatArg> for ExportFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Jpeg => ExportFormat::Jpeg,
            FormatArg::Png => ExportFormat::Png,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum AspectArg {
    Maintain,
    Crop,
    Fill,
}

impl From<AspectArg> for AspectMode {
    fn from(v: AspectArg) -> Self {
        match v {
            AspectArg::Maintain => AspectMode::Maintain,
            AspectArg::Crop => AspectMode::Crop,
            AspectArg::Fill => AspectMode::Fill,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar already gives feedback, so library INFO logs would
    // only tear it.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = ClientConfig::builder()
        .base_url(&cli.server)
        .request_timeout_secs(cli.timeout)
        .debounce_ms(cli.debounce_ms)
        .build()
        .context("Invalid configuration")?;

    match &cli.command {
        Command::Tools => {
            for tool in Tool::all() {
                println!("{:<10} {:<16} {}", bold(tool.id()), tool.name(), dim(tool.description()));
            }
            Ok(())
        }
        Command::Resize {
            file,
            width,
            height,
            unlock,
            mode,
            quality,
            preset,
            target_kb,
            auto_adjust,
            format,
            output,
        } => {
            let edits = ResizeEdits {
                width: *width,
                height: *height,
                unlock: *unlock,
                mode: (*mode).into(),
                quality: *quality,
                preset: *preset,
                target_kb: *target_kb,
                auto_adjust: *auto_adjust,
            };
            run_resize(&cli, &config, file, edits, (*format).into(), output.as_deref()).await
        }
        Command::Pdf2md {
            file,
            output,
            show_markdown,
        } => run_pdf2md(&cli, &config, file, output.as_deref(), *show_markdown).await,
        Command::Vid2gif {
            file,
            duration,
            target_size_mb,
            aspect,
            width,
            height,
            output,
        } => {
            let options = GifOptions {
                duration_secs: *duration,
                target_size_mb: *target_size_mb,
                aspect_mode: (*aspect).into(),
                use_original: width.is_none() && height.is_none(),
                width: *width,
                height: *height,
            };
            run_vid2gif(&cli, &config, file, options, output.as_deref()).await
        }
    }
}

struct ResizeEdits {
    width: Option<u32>,
    height: Option<u32>,
    unlock: bool,
    mode: ResizeMode,
    quality: Option<u8>,
    preset: Option<(u32, u32, u8)>,
    target_kb: Option<u32>,
    auto_adjust: bool,
}

async fn run_resize(
    cli: &Cli,
    config: &ClientConfig,
    file: &Path,
    edits: ResizeEdits,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let source = SourceFile::from_path(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut sizer = ImageSizer::new(config).context("Failed to create session")?;

    let upload = sizer.upload(Some(source)).await.context("Upload failed")?;
    if !cli.quiet {
        eprintln!(
            "{} {} {}",
            cyan("◆"),
            bold(upload.filename.as_deref().unwrap_or("image")),
            dim(&format!(
                "{}x{}, {}",
                upload.width,
                upload.height,
                launcher_client::format_bytes(upload.original_bytes)
            ))
        );
    }

    if let Some((w, h, q)) = edits.preset {
        sizer.apply_preset(w, h, q);
    }
    if edits.unlock {
        sizer.set_aspect_locked(false);
        sizer.set_mode(edits.mode);
    }
    if let Some(w) = edits.width {
        sizer.set_width(w);
    }
    if let Some(h) = edits.height {
        sizer.set_height(h);
    }
    if let Some(q) = edits.quality {
        sizer.set_quality(q);
    }
    if let Some(kb) = edits.target_kb {
        sizer.set_target_kb(kb);
    }
    sizer.settle().await;

    if edits.auto_adjust {
        sizer.auto_adjust().await.context("Auto-adjust failed")?;
        sizer.settle().await;
    }

    let view = sizer.view();
    if let Some(status) = &view.status {
        eprintln!("{} {}", red("✗"), red(status));
    }
    if let (Some(stats), false) = (&view.stats, cli.quiet) {
        eprintln!(
            "   {}  {}  q{}  {}",
            stats.dimensions_label(),
            bold(&stats.size_label()),
            stats.quality,
            match stats.deviation.status {
                launcher_client::presenter::TargetStatus::Over => red(&stats.deviation.label),
                launcher_client::presenter::TargetStatus::Ok => green(&stats.deviation.label),
            }
        );
    }

    let artifact = sizer.export(format).await.context("Export failed")?;
    let path = artifact
        .save(output.unwrap_or_else(|| Path::new(".")))
        .await
        .context("Failed to save export")?;
    if !cli.quiet {
        eprintln!("{}  {}", green("✔"), bold(&path.display().to_string()));
    }
    Ok(())
}

async fn run_task(
    cli: &Cli,
    config: &ClientConfig,
    tool: Tool,
    request: ConversionRequest,
) -> Result<(TaskController, TaskOutcome)> {
    let mut controller = TaskController::new(config, tool).context("Failed to create session")?;
    if !cli.quiet && !cli.no_progress {
        controller = controller.with_observer(CliObserver::new(tool));
    }
    let outcome = controller.run(request).await.context("Conversion failed")?;
    if let Some(err) = &outcome.result_error {
        eprintln!("{} {}", red("✗"), red(err));
    }
    Ok((controller, outcome))
}

async fn run_pdf2md(
    cli: &Cli,
    config: &ClientConfig,
    file: &Path,
    output: Option<&Path>,
    show_markdown: bool,
) -> Result<()> {
    let source = SourceFile::from_path(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let (controller, outcome) =
        run_task(cli, config, Tool::Pdf2Md, ConversionRequest::document(source)).await?;

    if let Some(summary) = outcome.summary() {
        if !cli.quiet {
            eprintln!("{}  {}", green("✔"), completion_stats(summary));
        }
        if show_markdown {
            if let Some(markdown) = &summary.markdown {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                handle
                    .write_all(markdown.as_bytes())
                    .context("Failed to write to stdout")?;
                if !markdown.ends_with('\n') {
                    handle.write_all(b"\n").ok();
                }
            }
        }
    }

    if let Some(target) = output {
        let artifact = controller.download().await.context("Download failed")?;
        let path = artifact.save(target).await.context("Failed to save Markdown")?;
        if !cli.quiet {
            eprintln!("   {}", bold(&path.display().to_string()));
        }
    }
    Ok(())
}

async fn run_vid2gif(
    cli: &Cli,
    config: &ClientConfig,
    file: &Path,
    options: GifOptions,
    output: Option<&Path>,
) -> Result<()> {
    let source = SourceFile::from_path(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let (_controller, outcome) = run_task(
        cli,
        config,
        Tool::Vid2Gif,
        ConversionRequest::gif(source, &options),
    )
    .await?;

    let Some(artifact) = outcome.artifact() else {
        anyhow::bail!("GIF finished but could not be downloaded");
    };
    let path = artifact
        .save(output.unwrap_or_else(|| Path::new(".")))
        .await
        .context("Failed to save GIF")?;
    if !cli.quiet {
        let size = gif_size_label(Some(&outcome.done), Some(artifact.bytes.len()))
            .unwrap_or_default();
        eprintln!(
            "{}  {}  {}",
            green("✔"),
            bold(&path.display().to_string()),
            dim(&size)
        );
    }
    Ok(())
}

/// Parse `--preset` as `WIDTH,HEIGHT,QUALITY`.
fn parse_preset(s: &str) -> std::result::Result<(u32, u32, u8), String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [w, h, q] = parts.as_slice() else {
        return Err(format!("expected WIDTH,HEIGHT,QUALITY, got '{s}'"));
    };
    let w: u32 = w.parse().map_err(|_| format!("invalid width '{w}'"))?;
    let h: u32 = h.parse().map_err(|_| format!("invalid height '{h}'"))?;
    let q: u8 = q.parse().map_err(|_| format!("invalid quality '{q}'"))?;
    if w == 0 || h == 0 || !(1..=100).contains(&q) {
        return Err(format!("preset out of range: '{s}'"));
    }
    Ok((w, h, q))
}
