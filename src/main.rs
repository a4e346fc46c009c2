mod config;
mod export;
mod logging;
mod model;
mod ports;
mod report;
mod resolver;
mod retry;
mod services;

use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, eyre};

use crate::config::{Config, RunOptions};
use crate::export::parse_export;
use crate::logging::init_tracing;
use crate::model::Library;
use crate::ports::streaming::StreamingService;
use crate::report::{write_library_snapshot, write_missing_report};
use crate::retry::{CallError, RateLimitLog, RetryPolicy, call_with_retry};
use crate::services::spotify::client::SpotifyClient;
use crate::services::sync::{SyncEngine, SyncOutcome};

/// Exit status for an upload that was declined or not confirmed.
const EXIT_UNCONFIRMED: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "PLAYLIST_MIGRATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter directive (e.g. "info" or "playlist_migrator=debug")
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Recreate the exported playlists on the streaming service
    Migrate {
        /// Path to the delimited export file
        #[arg(short, long, env = "INPUT_FILE")]
        input: PathBuf,

        /// Field delimiter used in the export file
        #[arg(short, long, env = "INPUT_DELIMITER")]
        delimiter: char,

        /// Bearer token for the streaming service
        #[arg(long, env = "SPOTIFY_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,

        /// Playlist owner id; fetched from the service when omitted
        #[arg(long)]
        owner: Option<String>,

        /// Where to write the missing-tracks report
        #[arg(long, default_value = "missing_tracks.csv", env = "MISSING_TRACKS_FILE")]
        missing_tracks_file: PathBuf,

        /// Base path for the timestamped JSON snapshot of the parsed model
        #[arg(long, default_value = "playlist_export.json", env = "JSON_EXPORT_FILE")]
        json_export_file: PathBuf,

        /// File to append rate-limit events to (never truncated)
        #[arg(long, default_value = "rate_limit_events.jsonl", env = "RATE_LIMIT_LOG")]
        rate_limit_log: PathBuf,

        /// Retries per remote call once throttled
        #[arg(long, default_value = "5")]
        max_retries: u32,

        /// Backoff base in seconds when the server suggests no delay
        #[arg(long, default_value = "1")]
        backoff_base: u64,

        /// Keep retrying through rate limits instead of halting on the first
        /// observed one
        #[arg(long)]
        no_stop_on_rate_limit: bool,

        /// Only parse the input and write the JSON snapshot; perform no
        /// remote calls
        #[arg(long)]
        export_only: bool,

        /// Skip the interactive confirmation and proceed with the upload
        #[arg(short = 'y', long)]
        yes: bool,
    },
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let config = match &args.config {
        Some(path) => {
            Config::from_file(path).wrap_err("Failed to load playlist-migrator config")?
        }
        None => Config::load()?,
    };

    match args.command {
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                Config::create_default()?;
                tracing::info!("Default config created");
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        },
        Commands::Migrate {
            input,
            delimiter,
            access_token,
            owner,
            missing_tracks_file,
            json_export_file,
            rate_limit_log,
            max_retries,
            backoff_base,
            no_stop_on_rate_limit,
            export_only,
            yes,
        } => {
            let options = RunOptions {
                input,
                delimiter,
                missing_tracks_file,
                json_export_file,
                rate_limit_log,
                retry: RetryPolicy {
                    max_retries,
                    backoff_base,
                    stop_on_first_rate_limit: !no_stop_on_rate_limit,
                },
                export_only,
                assume_yes: yes,
            };
            let access_token = access_token.or(config.access_token);
            migrate(&options, access_token, owner).await?;
        }
    }

    Ok(())
}

async fn migrate(
    options: &RunOptions,
    access_token: Option<String>,
    owner: Option<String>,
) -> Result<()> {
    let (library, meta) = parse_export(&options.input, options.delimiter)?;
    tracing::info!(
        playlists = meta.playlist_count,
        tracks = library.track_count(),
        encoding = %meta.encoding,
        lossy = meta.lossy,
        delimiter = %meta.delimiter,
        "Parsed export"
    );

    // Snapshot the parsed model before any remote call is attempted.
    let snapshot = write_library_snapshot(&options.json_export_file, &library, chrono::Utc::now())?;
    tracing::info!(path = %snapshot.display(), "Saved JSON snapshot of parsed model");

    if options.export_only {
        println!(
            "Exported parsed playlists to {}. Exiting (export-only mode).",
            snapshot.display()
        );
        return Ok(());
    }

    if !options.assume_yes && !confirm_upload(&library)? {
        println!("Aborting upload.");
        return Ok(());
    }

    let access_token = access_token.ok_or_else(|| {
        eyre!("No access token configured; pass --access-token or set it in the config file")
    })?;
    let service = SpotifyClient::new(access_token);
    let log = RateLimitLog::new(&options.rate_limit_log);

    let started = Instant::now();

    let owner_id = match owner {
        Some(owner) => owner,
        None => {
            let fetched = call_with_retry(
                &options.retry,
                &log,
                "current_user",
                serde_json::json!({}),
                || service.current_user(),
            )
            .await;
            match fetched {
                Ok(profile) => {
                    tracing::info!(
                        user = %profile.id,
                        display_name = ?profile.display_name,
                        "Resolved current user"
                    );
                    profile.id
                }
                Err(CallError::RateLimitCaptured(_)) => {
                    write_missing_report(&options.missing_tracks_file, &[])?;
                    println!(
                        "Rate limit captured while fetching the current user. Check {}.",
                        log.path().display()
                    );
                    return Ok(());
                }
                Err(CallError::Service(error)) => {
                    return Err(error).wrap_err("Failed to fetch current user");
                }
            }
        }
    };

    let mut engine = SyncEngine::new(&service, &options.retry, &log);
    let result = engine.sync(&owner_id, &library).await;

    // Partial progress must always be reported, even when the run halts or
    // fails part-way.
    write_missing_report(&options.missing_tracks_file, engine.missing_tracks())?;

    match result {
        Ok(SyncOutcome::Completed) => {
            println!(
                "All playlists processed in {:.2} seconds. Missing tracks logged to {}.",
                started.elapsed().as_secs_f64(),
                options.missing_tracks_file.display()
            );
            Ok(())
        }
        Ok(SyncOutcome::Halted(captured)) => {
            println!(
                "A rate limit was captured during {}. Details were appended to {}.",
                captured.operation,
                log.path().display()
            );
            Ok(())
        }
        Err(error) => Err(error).wrap_err("Playlist sync aborted"),
    }
}

/// Summarize the parsed model and ask for an explicit go-ahead. In a
/// non-interactive environment the upload is refused outright; hanging a CI
/// job on a prompt is worse than stopping.
fn confirm_upload(library: &Library) -> Result<bool> {
    print_summary(library, 10);

    if !std::io::stdin().is_terminal() {
        eprintln!("Non-interactive environment detected. To proceed with the upload, re-run with --yes.");
        std::process::exit(EXIT_UNCONFIRMED);
    }

    print!("Proceed to upload these playlists? [y/N]: ");
    std::io::stdout().flush().wrap_err("Failed to flush stdout")?;
    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .wrap_err("Failed to read confirmation")?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

fn print_summary(library: &Library, limit: usize) {
    println!(
        "\nSummary: {} playlists, {} total tracks",
        library.playlist_count(),
        library.track_count()
    );
    println!("Top playlists (name / tracks):");
    for (name, tracks) in library.playlists().take(limit) {
        println!(" - {name} / {}", tracks.len());
    }
}
