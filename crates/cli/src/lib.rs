use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use flipbook_render::Rasterizer;
use flipbook_storage::{DirectoryStore, ResolveStrategy, Resolver, UreqFetcher};
use flipbook_viewer::{
    AccessContext, GateReason, ImageFormat, Key, RenderBackend, Services, ViewerConfig,
    ViewerSession, ViewerState,
};
use pdf_engine::{PdfEngine, ThumbnailSize};
use serde::Serialize;
use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "flipbook")]
#[command(about = "Read magazine PDFs as flip-books")]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output; repeat for more detail
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write a debug log to this file
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable document metadata.
    Info {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Rasterize every page into a directory.
    Render {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        render: RenderArgs,
        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,
    },
    /// Render the cover page scaled to fit a box.
    Cover {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        render: RenderArgs,
        #[arg(long, default_value_t = 320)]
        width: u32,
        #[arg(long, default_value_t = 320)]
        height: u32,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the spread layout, one spread per line.
    Spreads {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Load a magazine and replay navigation, printing the page label after each step.
    View {
        #[command(flatten)]
        source: SourceArgs,
        /// Open as a reader who is not signed in
        #[arg(long)]
        signed_out: bool,
        /// Comma-separated steps: next, prev, first, last, left, right, up, down or a page number
        #[arg(long, value_delimiter = ',', value_parser = parse_step)]
        nav: Vec<Step>,
        /// Print the thumbnail strip after navigating
        #[arg(long)]
        thumbnails: bool,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// Storage path or http(s) URL of the magazine PDF
    #[arg(value_name = "REFERENCE")]
    reference: String,

    /// Serve storage paths from a local directory instead of the hosted bucket
    #[arg(long, value_name = "DIR")]
    store_dir: Option<PathBuf>,

    /// How storage paths are fetched
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Rasterizer backend; pdfium needs a build with the `pdfium` feature
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[arg(long)]
    scale: Option<f32>,
    #[arg(long)]
    quality: Option<u8>,
    #[arg(long, value_enum)]
    format: Option<FormatArg>,
    /// Pages rendered concurrently
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Download,
    SignedUrl,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Auto,
    Builtin,
    Pdfium,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Jpeg,
    Png,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Key(Key),
    Page(u32),
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    reference: String,
    bytes: usize,
    page_count: u32,
    spreads: usize,
    first_page_size_pt: Option<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;

    if let Commands::Version = cli.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = ViewerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Info { source } => run_info(&source, config),
        Commands::Render { source, render, out_dir } => {
            run_render(&source, render.apply(config)?, &out_dir)
        }
        Commands::Cover { source, render, width, height, output } => {
            run_cover(&source, render.apply(config)?, width, height, output.as_deref())
        }
        Commands::Spreads { source } => run_spreads(&source, config),
        Commands::View { source, signed_out, nav, thumbnails } => {
            run_view(&source, config, signed_out, &nav, thumbnails)
        }
        Commands::Version => Ok(()),
    }
}

fn init_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> =
        vec![TermLogger::new(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)];
    if let Some(path) = log_file {
        let file = File::create(path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }

    // A logger may already be installed when `run` is called more than once.
    let _ = CombinedLogger::init(loggers);
    Ok(())
}

impl RenderArgs {
    fn apply(&self, mut config: ViewerConfig) -> Result<ViewerConfig> {
        if let Some(scale) = self.scale {
            config.render.scale = scale;
        }
        if let Some(quality) = self.quality {
            config.render.jpeg_quality = quality;
        }
        if let Some(format) = self.format {
            config.render.format = match format {
                FormatArg::Jpeg => ImageFormat::Jpeg,
                FormatArg::Png => ImageFormat::Png,
            };
        }
        if let Some(workers) = self.workers {
            config.render.workers = workers;
        }
        config.validate().context("invalid render options")?;
        Ok(config)
    }
}

fn parse_step(value: &str) -> Result<Step, String> {
    let step = match value.trim().to_ascii_lowercase().as_str() {
        "next" | "n" => Step::Key(Key::Right),
        "prev" | "previous" | "p" => Step::Key(Key::Left),
        "first" | "home" => Step::Key(Key::Home),
        "last" | "end" => Step::Key(Key::End),
        "left" => Step::Key(Key::Left),
        "right" => Step::Key(Key::Right),
        "up" => Step::Key(Key::Up),
        "down" => Step::Key(Key::Down),
        other => match other.parse::<u32>() {
            Ok(page) if page >= 1 => Step::Page(page - 1),
            _ => return Err(format!("unknown navigation step '{value}'")),
        },
    };
    Ok(step)
}

fn build_services(source: &SourceArgs, mut config: ViewerConfig) -> Result<Services> {
    if let Some(strategy) = source.strategy {
        config.storage.strategy = match strategy {
            StrategyArg::Download => ResolveStrategy::Download,
            StrategyArg::SignedUrl => ResolveStrategy::SignedUrl,
        };
    }
    if let Some(backend) = source.backend {
        config.render.backend = match backend {
            BackendArg::Auto => RenderBackend::Auto,
            BackendArg::Builtin => RenderBackend::Builtin,
            BackendArg::Pdfium => RenderBackend::Pdfium,
        };
        config.validate().context("invalid --backend")?;
    }

    let services = match &source.store_dir {
        Some(dir) => local_services(dir, config),
        None if config.storage.base_url.is_some() => {
            Services::from_config(&config).context("invalid storage configuration")?
        }
        None => {
            let cwd = std::env::current_dir().context("failed to read current directory")?;
            local_services(&cwd, config)
        }
    };

    log::debug!("rasterizing with the {} backend", services.config.render.backend.name());
    Ok(services)
}

fn local_services(root: &Path, config: ViewerConfig) -> Services {
    log::debug!("serving storage paths from {}", root.display());
    let resolver = Resolver::new(
        Arc::new(DirectoryStore::with_root(root)),
        Arc::new(UreqFetcher::new(config.http_timeout())),
    )
    .with_strategy(config.storage.strategy)
    .with_signed_url_ttl(config.signed_url_ttl());
    Services::new(resolver).with_config(config)
}

/// Mount and fully load a session, failing on gates and load errors.
fn load_session(source: &SourceArgs, config: ViewerConfig, access: AccessContext) -> Result<ViewerSession> {
    let services = build_services(source, config)?;
    let mut session = ViewerSession::mount(Some(&source.reference), &access, services);

    match session.state() {
        ViewerState::Gated(reason @ GateReason::InvalidReference(err)) => {
            anyhow::bail!("{}: {err}", reason.message())
        }
        ViewerState::Gated(reason) => anyhow::bail!("{}", reason.message()),
        _ => {}
    }

    session.spawn_load();
    if let ViewerState::Error(err) = session.wait() {
        return Err(anyhow::anyhow!("{err}"))
            .with_context(|| format!("failed to load {}", source.reference));
    }
    if !session.state().is_ready() {
        anyhow::bail!("unexpected viewer state {:?}", session.state());
    }
    Ok(session)
}

fn run_info(source: &SourceArgs, config: ViewerConfig) -> Result<()> {
    let flip_config = config.flip_book_config();
    let services = build_services(source, config)?;
    let bytes = services
        .resolver
        .resolve_str(&source.reference)
        .with_context(|| format!("failed to retrieve {}", source.reference))?;
    let size = bytes.len();

    let mut engine = (services.engine)()?;
    let handle = engine.open(bytes).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let first_page_size_pt = if page_count > 0 {
        let size = engine.page_size(handle, 0)?;
        Some(PageSizeOutput { width: size.width_pt, height: size.height_pt })
    } else {
        None
    };
    engine.close(handle)?;

    let spreads = flipbook_viewer::FlipBook::new(page_count, flip_config).spreads().len();
    let payload = InfoOutput {
        reference: source.reference.clone(),
        bytes: size,
        page_count,
        spreads,
        first_page_size_pt,
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");
    Ok(())
}

fn run_render(source: &SourceArgs, config: ViewerConfig, out_dir: &Path) -> Result<()> {
    let session = load_session(source, config, AccessContext::reader())?;
    let cache = session.cache().context("no pages were cached")?;

    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;

    for page in cache.pages() {
        let path = out_dir.join(format!("page-{:03}.{}", page.number(), page.format.extension()));
        fs::write(&path, &page.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{}", path.display());
    }

    let stats = cache.stats();
    log::info!("wrote {} pages ({} bytes)", stats.pages, stats.memory_used);
    Ok(())
}

fn run_cover(
    source: &SourceArgs,
    config: ViewerConfig,
    width: u32,
    height: u32,
    output: Option<&Path>,
) -> Result<()> {
    let raster_config = config.raster_config();
    let services = build_services(source, config)?;
    let bytes = services
        .resolver
        .resolve_str(&source.reference)
        .with_context(|| format!("failed to retrieve {}", source.reference))?;

    let engine = (services.engine)()?;
    let mut rasterizer = Rasterizer::with_engine(engine, raster_config);
    let cover = rasterizer
        .render_cover(bytes, ThumbnailSize { width_px: width, height_px: height })
        .context("failed to render cover")?;

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => {
            let name = source.reference.rsplit('/').next().unwrap_or("magazine");
            let stem = name.split('.').next().filter(|stem| !stem.is_empty()).unwrap_or("magazine");
            PathBuf::from(format!("{stem}-cover.{}", cover.format.extension()))
        }
    };
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&output, &cover.bytes)
        .with_context(|| format!("failed to write cover to {}", output.display()))?;

    println!("{}", output.display());
    Ok(())
}

fn run_spreads(source: &SourceArgs, config: ViewerConfig) -> Result<()> {
    let session = load_session(source, config, AccessContext::reader())?;
    let book = session.book().context("viewer is not ready")?;

    for spread in book.spreads() {
        match spread.right {
            Some(right) => println!("{}-{}", spread.left + 1, right + 1),
            None => println!("{}", spread.left + 1),
        }
    }
    Ok(())
}

fn run_view(
    source: &SourceArgs,
    config: ViewerConfig,
    signed_out: bool,
    steps: &[Step],
    thumbnails: bool,
) -> Result<()> {
    let access = if signed_out { AccessContext::anonymous() } else { AccessContext::reader() };
    let mut session = load_session(source, config, access)?;

    if let Some(book) = session.book() {
        println!("{}", book.page_label());
    }
    for step in steps {
        match *step {
            Step::Key(key) => session.handle_key(key),
            Step::Page(page) => session.jump_to(page),
        };
        if let Some(book) = session.book() {
            println!("{}", book.page_label());
        }
    }

    if thumbnails {
        for item in session.thumbnails() {
            let marker = if item.highlighted { "*" } else { " " };
            let size = item.image.as_ref().map_or(0, |page| page.memory_size());
            println!("{marker} {:>3} {size}", item.label);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nav_steps_parse() {
        assert_eq!(parse_step("next"), Ok(Step::Key(Key::Right)));
        assert_eq!(parse_step(" Prev "), Ok(Step::Key(Key::Left)));
        assert_eq!(parse_step("12"), Ok(Step::Page(11)));
        assert!(parse_step("0").is_err());
        assert!(parse_step("sideways").is_err());
    }

    #[test]
    fn render_args_override_config() {
        let args = RenderArgs { scale: Some(2.0), quality: None, format: Some(FormatArg::Png), workers: Some(4) };
        let config = args.apply(ViewerConfig::default()).unwrap();
        assert_eq!(config.render.scale, 2.0);
        assert_eq!(config.render.jpeg_quality, 70);
        assert_eq!(config.render.format, ImageFormat::Png);
        assert_eq!(config.render.workers, 4);

        let args = RenderArgs { scale: None, quality: Some(0), format: None, workers: None };
        assert!(args.apply(ViewerConfig::default()).is_err());
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
