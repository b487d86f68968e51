use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use docview_cache::{CacheConfig, CacheKey, RenderCache};
use docview_render::{DecodePriority, Document, ImageDirSource, OpenSource, Page, PixelSource};
use docview_scheduler::{DecodeScheduler, SchedulerConfig};
use flume::RecvTimeoutError;
use log::{info, LevelFilter};
use serde::Serialize;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "docview-cli")]
#[command(about = "Render document pages through the docview decode scheduler")]
pub struct Cli {
    /// Log to stderr (-v for info, -vv for debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable document metadata.
    Info {
        /// An image file or a directory of page images.
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Render one page to a PNG file.
    Render {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 800)]
        width: u32,
        #[arg(long, default_value_t = 1.0)]
        zoom: f32,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Cache settings file (TOML); replaces the DOCVIEW_* environment.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Persistent cache directory (overrides DOCVIEW_CACHE_DIR).
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
        /// Keep rendered pages in memory only.
        #[arg(long, conflicts_with = "cache_dir")]
        no_cache: bool,
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },
    /// Print the storage key for a rendered page.
    CacheKey {
        /// Document identity, e.g. file:///books/a.djvu
        #[arg(value_name = "DOCUMENT")]
        document: String,
        /// 0-based page index.
        #[arg(value_name = "PAGE")]
        page: usize,
        #[arg(value_name = "WIDTH")]
        width: u32,
    },
    /// Print the effective cache settings as TOML.
    Config {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Write the settings to FILE instead of stdout.
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    document_id: String,
    page_count: usize,
    first_page_size: Option<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: u32,
    height: u32,
}

struct RenderArgs {
    page: usize,
    width: u32,
    zoom: f32,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    no_cache: bool,
    timeout: Duration,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { path } => run_info(&path),
        Commands::Render {
            path,
            page,
            width,
            zoom,
            output,
            config,
            cache_dir,
            no_cache,
            timeout_ms,
        } => {
            let args = RenderArgs {
                page,
                width,
                zoom,
                output,
                config,
                cache_dir,
                no_cache,
                timeout: Duration::from_millis(timeout_ms),
            };
            run_render(&path, args)
        }
        Commands::CacheKey { document, page, width } => {
            println!("{}", CacheKey::derive(&document, page, width));
            Ok(())
        }
        Commands::Config { config, save } => run_config(config.as_deref(), save.as_deref()),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    // A second init in the same process keeps the first logger.
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Never);
}

fn run_info(path: &Path) -> Result<()> {
    ensure_exists(path)?;

    let source = OpenSource::from(path);
    let document = ImageDirSource::new().open(&source).context("failed to open document")?;

    let page_count = document.page_count();
    let first_page_size = if page_count > 0 {
        let size = document.page(0, DecodePriority::High)?.size()?;
        Some(PageSizeOutput { width: size.width, height: size.height })
    } else {
        None
    };

    let payload = InfoOutput {
        path: path.display().to_string(),
        document_id: source.document_id().to_string(),
        page_count,
        first_page_size,
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    Ok(())
}

fn run_render(path: &Path, args: RenderArgs) -> Result<()> {
    ensure_exists(path)?;

    if args.page == 0 {
        anyhow::bail!("--page is 1-based and must be >= 1");
    }

    let cache = open_cache(args.config.as_deref(), args.cache_dir.as_deref(), args.no_cache)?;
    let mut scheduler = DecodeScheduler::open(
        &ImageDirSource::new(),
        &OpenSource::from(path),
        Arc::new(cache),
        SchedulerConfig::default(),
    )
    .context("failed to open document")?;

    let page_count = scheduler.page_count();
    if args.page > page_count {
        anyhow::bail!("page {} out of range (document has {page_count} pages)", args.page);
    }

    let (sender, receiver) = flume::bounded(1);
    scheduler
        .decode_page(args.page - 1, args.width, args.zoom, move |rendered| {
            let _ = sender.send(rendered);
        })
        .context("failed to schedule render")?;

    let rendered = match receiver.recv_timeout(args.timeout) {
        Ok(rendered) => rendered,
        Err(RecvTimeoutError::Timeout) => {
            anyhow::bail!("page {} was not rendered within {:?}", args.page, args.timeout)
        }
        Err(RecvTimeoutError::Disconnected) => {
            anyhow::bail!("failed to render page {}", args.page)
        }
    };
    info!(
        "page {} rendered at {}x{} (from cache: {})",
        args.page,
        rendered.image.width(),
        rendered.image.height(),
        rendered.from_cache
    );

    let output = args.output.unwrap_or_else(|| default_page_output(path, args.page));
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    rendered
        .image
        .save(&output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;

    println!("{}", output.display());

    scheduler.shutdown();

    Ok(())
}

fn run_config(config: Option<&Path>, save: Option<&Path>) -> Result<()> {
    let config = load_cache_config(config)?;

    match save {
        Some(path) => {
            config
                .save_to_file(path)
                .with_context(|| format!("failed to write config to {}", path.display()))?;
            println!("{}", path.display());
        }
        None => print!("{}", config.to_toml()?),
    }

    Ok(())
}

fn load_cache_config(config: Option<&Path>) -> Result<CacheConfig> {
    match config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => CacheConfig::from_env().context("invalid cache configuration"),
    }
}

fn open_cache(
    config: Option<&Path>,
    cache_dir: Option<&Path>,
    no_cache: bool,
) -> Result<RenderCache> {
    let mut config = load_cache_config(config)?;
    if let Some(dir) = cache_dir {
        config = config.with_disk_dir(dir);
    }
    if no_cache {
        config = config.without_persistence();
    }

    RenderCache::new(&config)
        .with_context(|| format!("failed to open cache at {}", config.disk_cache_dir.display()))
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("path does not exist: {}", path.display());
    }

    Ok(())
}

fn default_page_output(path: &Path, page: usize) -> PathBuf {
    let stem = path.file_stem().and_then(|name| name.to_str()).unwrap_or("page");

    path.with_file_name(format!("{stem}-page-{page}.png"))
}
