use std::path::PathBuf;
use std::process;
use std::time::Duration;

use directories::ProjectDirs;
use easy_error::{Error, ResultExt};
use reqwest::Url;
use structopt::StructOpt;
use tracing::{error, info, warn};

use loveread_epub::cancellation::CancellationToken;
use loveread_epub::config::{Config, PacingPolicy};
use loveread_epub::fetcher::{HttpFetcher, RetryPolicy};
use loveread_epub::{logging, pipeline};

/// Downloads a book from the loveread.ec online reader and converts it to EPUB format.
#[derive(StructOpt)]
struct Args {
    /// Reader (read_book.php) or overview (view_global.php) url of the book
    url: String,
    /// Where the assembled document, cover and epub are stored. Defaults to the user data directory
    #[structopt(short, long, parse(from_os_str))]
    output_dir: Option<PathBuf>,
    /// Only urls of this site are accepted
    #[structopt(long, default_value = "http://loveread.ec")]
    site: String,
    /// Shortest pause between two pages, in seconds
    #[structopt(long, default_value = "10")]
    min_delay: u64,
    /// Longest pause between two pages, in seconds
    #[structopt(long, default_value = "30")]
    max_delay: u64,
    /// Do not pause between pages
    #[structopt(long)]
    no_delay: bool,
    /// Tries per request before a network failure ends the run
    #[structopt(long, default_value = "3")]
    retries: u32,
    /// Pause before the first retry, in seconds; grows with every further try
    #[structopt(long, default_value = "5")]
    retry_backoff: u64,
    /// Continue after the last page written by an earlier run
    #[structopt(short, long)]
    resume: bool,
    /// Only build the epub from the document already on disk
    #[structopt(long)]
    skip_fetch: bool,
}

fn default_output_dir() -> PathBuf {
    ProjectDirs::from("ec", "loveread", "loveread-epub")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("output"))
}

fn config_from_args(args: &Args) -> Result<Config, Error> {
    let site = Url::parse(&args.site).context(format!("Could not parse site url '{}'", args.site))?;
    let pacing = if args.no_delay {
        PacingPolicy::disabled()
    } else {
        PacingPolicy {
            enabled: true,
            min_delay: Duration::from_secs(args.min_delay),
            max_delay: Duration::from_secs(args.max_delay),
        }
    };

    Ok(Config {
        output_dir: args.output_dir.clone().unwrap_or_else(default_output_dir),
        site,
        pacing,
        retry: RetryPolicy {
            attempts: args.retries.max(1),
            backoff: Duration::from_secs(args.retry_backoff),
        },
        resume: args.resume,
        skip_fetch: args.skip_fetch,
    })
}

fn interpret_args() -> Result<(), Error> {
    let args = Args::from_args();
    let config = config_from_args(&args)?;
    info!(output_dir = %config.output_dir.display(), "Using output directory");

    let cancel = CancellationToken::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupted, stopping after the current page");
        handle.cancel();
    })
    .context("Could not install Ctrl-C handler")?;

    let fetcher = HttpFetcher::new(config.retry).context("Could not create http client")?;
    let epub = pipeline::run(&config, &fetcher, &args.url, cancel)
        .context(format!("Could not convert {}", args.url))?;

    info!(path = %epub.display(), "Done");
    Ok(())
}

fn main() {
    if let Err(err) = logging::init() {
        eprintln!("{err}");
    }

    if let Err(err) = interpret_args() {
        error!("{err}");
        let mut cause = std::error::Error::source(&err);
        while let Some(inner) = cause {
            error!("  caused by: {inner}");
            cause = inner.source();
        }
        process::exit(1);
    }
}
