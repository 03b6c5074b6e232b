use std::collections::BTreeSet;
use std::fs::{self, File};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info};
use simplelog::{Config, LevelFilter, WriteLogger};

use pageview::panic_handler;
use pageview::pdf::{MupdfBackend, PagedViewer, ViewerEvent};
use pageview::settings;

/// Render pages of a local or remote PDF to PNG files
#[derive(Parser)]
#[command(name = "pageview", version)]
struct Args {
    /// Path or http(s) URL of the document
    reference: String,

    /// Zero-based page range to render, `start..end`
    #[arg(long, default_value = "0..1", value_parser = parse_pages)]
    pages: Range<usize>,

    #[arg(long, default_value_t = 1080.0)]
    viewport_width: f32,

    #[arg(long, default_value_t = 1920.0)]
    viewport_height: f32,

    /// Directory the PNG files are written to
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Settings file to use instead of the one in the config dir
    #[arg(long)]
    config: Option<PathBuf>,

    /// Download again even if the document is cached
    #[arg(long)]
    no_cache: bool,

    #[arg(long, default_value = "pageview.log")]
    log_file: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 300)]
    timeout: u64,
}

fn parse_pages(value: &str) -> Result<Range<usize>, String> {
    let (start, end) = match value.split_once("..") {
        Some((start, end)) => (start, end),
        None => (value, ""),
    };
    let start: usize = start
        .trim()
        .parse()
        .map_err(|_| format!("invalid page range start in {value:?}"))?;
    let end = if end.trim().is_empty() {
        start + 1
    } else {
        end.trim()
            .parse()
            .map_err(|_| format!("invalid page range end in {value:?}"))?
    };
    if end <= start {
        return Err(format!("page range {value:?} is empty"));
    }
    Ok(start..end)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("Cannot create log file {:?}", args.log_file))?,
    )?;
    panic_handler::initialize_panic_handler();
    info!("Starting pageview for {}", args.reference);

    match &args.config {
        Some(path) => settings::load_settings_from_path(path)?,
        None => settings::load_settings(),
    }
    let mut viewer_settings = settings::get_settings();
    if args.no_cache {
        viewer_settings.download_cache_enabled = false;
    }

    fs::create_dir_all(&args.out)
        .with_context(|| format!("Cannot create output directory {:?}", args.out))?;

    let mut viewer = PagedViewer::with_settings(MupdfBackend, &viewer_settings)
        .context("Cannot open download cache")?;
    let result = render_pages(&mut viewer, &args);
    viewer.shutdown();

    if let Err(err) = &result {
        error!("{err:#}");
    }
    info!("Shutting down pageview");
    result
}

fn render_pages(viewer: &mut PagedViewer, args: &Args) -> Result<()> {
    viewer.set_viewport(args.viewport_width, args.viewport_height);
    viewer.set_visible_range(args.pages.clone());
    viewer.load(&args.reference);

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    let mut written = BTreeSet::new();
    let mut failed = BTreeSet::new();

    loop {
        for event in viewer.wait(Duration::from_millis(100)) {
            match event {
                ViewerEvent::DownloadProgress(fraction) => {
                    eprint!("\rDownloading {:>3.0}%", fraction * 100.0);
                }
                ViewerEvent::DocumentReady { page_count } => {
                    eprintln!("\rOpened document with {page_count} pages");
                }
                ViewerEvent::DocumentFailed(err) => {
                    eprintln!();
                    bail!("Cannot load {}: {err}", args.reference);
                }
                ViewerEvent::PageReady(page) => {
                    let path = write_page(viewer, page, &args.out)?;
                    eprintln!("Wrote {}", path.display());
                    written.insert(page);
                }
                ViewerEvent::PageFailed { page, error } => {
                    eprintln!("Page {page} failed: {error}");
                    failed.insert(page);
                }
                ViewerEvent::TransformChanged(_) => {}
            }
        }

        if let Some(page_count) = viewer.page_count() {
            let wanted = args.pages.start.min(page_count)..args.pages.end.min(page_count);
            if wanted
                .clone()
                .all(|page| written.contains(&page) || failed.contains(&page))
            {
                let target = viewer.render_target();
                println!(
                    "Rendered {} of {} requested pages at {}x{} ({} failed)",
                    written.len(),
                    wanted.len(),
                    target.width,
                    target.height,
                    failed.len()
                );
                return Ok(());
            }
        }

        if Instant::now() >= deadline {
            bail!("Timed out after {}s", args.timeout);
        }
    }
}

fn write_page(viewer: &PagedViewer, page: usize, out: &Path) -> Result<PathBuf> {
    let image = viewer
        .page(page)
        .with_context(|| format!("Page {page} was released before it could be written"))?;
    let pixels = image
        .to_vec()
        .with_context(|| format!("Page {page} has no pixels"))?;
    let buffer = image::RgbaImage::from_raw(image.width(), image.height(), pixels)
        .context("Pixel buffer does not match image size")?;

    let path = out.join(format!("page-{}.png", page + 1));
    buffer
        .save(&path)
        .with_context(|| format!("Cannot write {path:?}"))?;
    Ok(path)
}
