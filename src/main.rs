//! Command-line entry point for channelplus-dl.

use channelplus_dl::config::{Config, EpisodeRange};
use channelplus_dl::report::{FinalStatus, ProgressView, render_summary};
use channelplus_dl::site::{self, CourseMaterial, Episode, SiteClient};
use channelplus_dl::{BatchDownloader, BatchSummary, Error, HttpTransfer, Result};
use clap::Parser;
use indicatif::ProgressDrawTarget;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Entries shown when listing episodes or materials
const LIST_PREVIEW: usize = 10;

#[derive(Debug, Parser)]
#[command(name = "channelplus-dl", version)]
#[command(about = "Download Channel Plus course audio and materials, resuming where the last run stopped")]
struct Cli {
    /// Channel Plus course URL (e.g. https://channelplus.ner.gov.tw/viewalllang/390)
    #[arg(long)]
    link: String,

    /// Download directory (default: ~/Downloads/<course name>)
    #[arg(long)]
    path: Option<PathBuf>,

    /// First episode to download
    #[arg(long, default_value_t = 1)]
    start: u32,

    /// Last episode to download (default: last episode of the course)
    #[arg(long = "final")]
    final_episode: Option<u32>,

    /// Concurrent downloads (1-10)
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=10))]
    concurrent: u8,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Attempts per file before it counts as failed (1-10)
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=10))]
    retry_attempts: u32,

    /// Delay between requests in seconds
    #[arg(long, default_value_t = 1.0)]
    delay: f64,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    verbose: bool,

    /// Show what would be downloaded without downloading
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Only validate the course URL and show course information
    #[arg(long, default_value_t = false)]
    validate_only: bool,

    /// Download every file again, ignoring existing files
    #[arg(long, default_value_t = false)]
    force_redownload: bool,

    /// Forget the resume ledger (existing valid files are still kept)
    #[arg(long, default_value_t = false)]
    clean_resume: bool,
}

impl Cli {
    fn to_config(&self) -> Result<Config> {
        let mut config = Config::default();
        config.download.concurrent_downloads = usize::from(self.concurrent);
        config.download.timeout = Duration::from_secs(self.timeout);
        config.download.delay_between_requests = Duration::try_from_secs_f64(self.delay)
            .map_err(|e| Error::config("delay", format!("invalid delay {}: {e}", self.delay)))?;
        config.retry.max_attempts = self.retry_attempts;
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},reqwest=warn,hyper=warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(Error::Cancelled) => {
            println!("\nDownload interrupted; run the same command again to resume");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = cli.to_config()?;
    let http = Arc::new(HttpTransfer::new(&config)?);
    let site = SiteClient::new(http.clone(), config.site.clone());

    let course_id = site::extract_course_id(&cli.link)?;

    let final_episode = match cli.final_episode {
        Some(n) => n,
        None => {
            println!("Auto-detecting total episodes...");
            let total = site.total_episodes(course_id).await?;
            println!("Found {total} total episodes");
            total
        }
    };
    let range = EpisodeRange::new(cli.start, final_episode)?;

    let path = match &cli.path {
        Some(path) => path.clone(),
        None => {
            println!("Auto-detecting course name for folder...");
            let name = site.course_name(course_id).await;
            let path = dirs::home_dir()
                .map(|home| home.join("Downloads"))
                .unwrap_or_else(|| PathBuf::from("downloads"))
                .join(name);
            println!("Using path: {}", path.display());
            path
        }
    };
    config.download.download_dir = path.clone();

    print_settings(&cli, &config, range);

    println!("Validating course URL...");
    if !site.validate_course_url(&cli.link).await {
        eprintln!("Invalid course URL or no episodes found");
        return Ok(ExitCode::FAILURE);
    }
    println!("Course URL is valid");

    if cli.validate_only {
        let info = site.course_info(&cli.link).await?;
        println!("\nCourse Information");
        println!("Course ID: {}", info.course_id);
        println!("Episodes found: {}", info.episodes_found);
        println!("Max episode number: {}", info.max_episode_found);
        if let Some(sample) = &info.sample_episode {
            println!("\nSample episode:");
            println!("  - Part {}: {}", sample.part, sample.name);
            println!("  - Duration: {:.1} minutes", sample.duration_minutes());
        }
        return Ok(ExitCode::SUCCESS);
    }

    println!("\nCollecting episodes {} to {}...", range.start(), range.end());
    let episodes = site.collect_episodes(course_id, range).await;
    if episodes.is_empty() {
        eprintln!("No episodes found in the specified range");
        return Ok(ExitCode::FAILURE);
    }
    println!("Found {} episodes", episodes.len());

    let materials = site::detect_materials(&config.site.base_url, &episodes);
    if materials.is_empty() {
        println!("No course materials found");
    } else {
        let mut with_materials: Vec<u32> = materials.iter().map(|m| m.episode).collect();
        with_materials.dedup();
        println!(
            "Found {} course materials across {} episodes",
            materials.len(),
            with_materials.len()
        );
    }

    if cli.verbose || cli.dry_run {
        print_episodes(&episodes);
    }
    if cli.dry_run {
        print_dry_run(&episodes, &materials);
        return Ok(ExitCode::SUCCESS);
    }

    let items = site::build_items(&config.site.base_url, &episodes, &materials);
    let retry_rounds = config.download.retry_rounds;
    let downloader = BatchDownloader::new(config, http).await?;

    if cli.clean_resume && downloader.clean_resume().await? {
        println!("Cleared resume state, starting fresh");
    }
    if cli.force_redownload {
        println!("Force redownload enabled, ignoring existing files");
    }

    tokio::spawn(channelplus_dl::shutdown_on_signal(
        downloader.cancellation_token(),
    ));

    println!("\nStarting download of {} files...", items.len());
    let view = ProgressView::spawn(downloader.subscribe(), ProgressDrawTarget::stderr());
    let mut summary = downloader.run(&items, cli.force_redownload).await;
    view.finish().await;
    println!("{}", render_summary("Download Summary", &summary));

    if summary.failed > 0 && !summary.cancelled && retry_rounds > 0 {
        println!("\nRetrying {} failed downloads...", summary.failed);
        let view = ProgressView::spawn(downloader.subscribe(), ProgressDrawTarget::stderr());
        let retried = downloader.retry(retry_rounds).await;
        view.finish().await;
        summary.merge_retry(&retried);

        if retried.failed > 0 {
            println!(
                "\n{} downloads still failed after retries; try running the command again later.",
                retried.failed
            );
        } else {
            println!("All failed downloads completed successfully");
        }
    }

    finish(&summary)
}

fn finish(summary: &BatchSummary) -> Result<ExitCode> {
    if summary.cancelled {
        return Err(Error::Cancelled);
    }
    println!("\n{}", FinalStatus::of(summary).message());
    Ok(ExitCode::SUCCESS)
}

fn print_settings(cli: &Cli, config: &Config, range: EpisodeRange) {
    let rule = "=".repeat(60);
    let per_page = config.site.episodes_per_page;
    println!("{rule}");
    println!("Course URL: {}", cli.link);
    println!(
        "Episodes: {} to {} ({} total)",
        range.start(),
        range.end(),
        range.len()
    );
    println!("Download path: {}", config.download.download_dir.display());
    println!(
        "Pages to scan: {} to {}",
        range.start_page(per_page),
        range.end_page(per_page)
    );
    if !cli.dry_run && !cli.validate_only {
        println!("Concurrent downloads: {}", config.download.concurrent_downloads);
        println!("Request timeout: {}s", config.download.timeout.as_secs());
    }
    println!("{rule}");
}

fn print_episodes(episodes: &[Episode]) {
    println!("\nEpisodes to download:");
    for episode in episodes.iter().take(LIST_PREVIEW) {
        println!(
            "  {:3}. {} ({:.1}min)",
            episode.part,
            episode.name,
            episode.duration_minutes()
        );
    }
    if episodes.len() > LIST_PREVIEW {
        println!("  ... and {} more episodes", episodes.len() - LIST_PREVIEW);
    }
}

fn print_dry_run(episodes: &[Episode], materials: &[CourseMaterial]) {
    if !materials.is_empty() {
        println!("\nCourse materials found:");
        for material in materials.iter().take(LIST_PREVIEW) {
            println!(
                "  Ep{:02}: {}",
                material.episode,
                site::material_file_name(&material.attachment, material.episode)
            );
        }
        if materials.len() > LIST_PREVIEW {
            println!("  ... and {} more materials", materials.len() - LIST_PREVIEW);
        }
    }

    let minutes: f64 = episodes.iter().map(Episode::duration_minutes).sum();
    println!("\nDry run completed");
    println!(
        "Would download {} episodes ({minutes:.1} minutes total)",
        episodes.len()
    );
    if !materials.is_empty() {
        println!("Would download {} course materials", materials.len());
    }
}
