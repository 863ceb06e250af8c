use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use clap::{ArgAction, ArgGroup, Parser, Subcommand};
use log::{LevelFilter, info, warn};

use crate::aggregator::Conversations;
use crate::client::{HttpSource, Observer, Phase, Projection, StreamCoordinator};
use crate::clipboard::copy_playlist_url;
use crate::config::{Config, TOKEN_ENV};
use crate::corpus::SqliteCorpus;
use crate::filters::{compile, parse_filter, parser::parse_date};
use crate::models::{
    ConversationRecord, DateRange, PlaylistRequest, PlaylistRun, PlaylistSummary, ProgressUpdate,
};
use crate::protocol::{Completion, StreamEvent};
use crate::server::{self, ServerContext};
use crate::synth::{SpotifyCatalog, SynthesisError, Synthesizer};
use crate::utils::{format_path_with_tilde, single_line};

#[derive(Parser)]
#[command(name = "chat-playlist-explorer")]
#[command(version = "0.1.0")]
#[command(about = "Find conversations that shared music and turn them into playlists", long_about = None)]
pub struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Message database to read instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    pub corpus: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the streaming backend
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Search conversations (e.g. `roadtrip since:2024-06-01 from:alice links:yes`)
    Search {
        #[arg(required = true, value_name = "FILTER")]
        filter: Vec<String>,
        /// Stream results from a running backend instead of reading the corpus directly
        #[arg(long, value_name = "URL")]
        server: Option<String>,
        /// One JSON record per line
        #[arg(long)]
        json: bool,
        /// Give up on a streamed search after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Create or update a playlist from the music shared in conversations
    #[command(group(ArgGroup::new("target").required(true).args(["name", "playlist_id"])))]
    Synthesize {
        /// Playlist name, found or created
        #[arg(long)]
        name: Option<String>,
        /// Existing playlist id
        #[arg(long)]
        playlist_id: Option<String>,
        /// Conversation id (repeatable)
        #[arg(long = "chat", value_name = "ID", required = true)]
        chats: Vec<i64>,
        #[arg(long, value_parser = parse_date_arg)]
        since: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date_arg)]
        until: Option<NaiveDate>,
        /// Run on a backend and follow its progress stream
        #[arg(long, value_name = "URL")]
        server: Option<String>,
        /// Copy the playlist link to the clipboard when done
        #[arg(long)]
        copy_url: bool,
    },
    /// Show corpus statistics
    Stats,
}

fn parse_date_arg(value: &str) -> Result<NaiveDate, String> {
    parse_date(value).map_err(|e| format!("{:#}", e))
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load()?;
    init_logging(cli.verbose, &config.log_level);
    if let Some(corpus) = cli.corpus {
        config.corpus_path = corpus;
    }

    match cli.command {
        Some(Commands::Serve { bind, port }) => serve(config, bind, port)?,
        Some(Commands::Search { filter, server, json, timeout }) => {
            search(&config, &filter.join(" "), server.as_deref(), json, timeout)?;
        }
        Some(Commands::Synthesize {
            name,
            playlist_id,
            chats,
            since,
            until,
            server,
            copy_url,
        }) => {
            let request = PlaylistRequest {
                name,
                playlist_id,
                chat_ids: chats,
                date_range: DateRange::new(since, until),
            };
            let summary = synthesize(&config, request, server.as_deref())?;
            if copy_url {
                match copy_playlist_url(&summary.playlist.url) {
                    Ok(()) => println!("Copied {} to clipboard", summary.playlist.url),
                    Err(e) => warn!("Could not copy playlist URL: {:#}", e),
                }
            }
        }
        Some(Commands::Stats) => show_stats(&config)?,
        None => {
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, configured: &str) {
    let level = match verbose {
        0 => configured.parse().unwrap_or(LevelFilter::Info),
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut clog = colog::default_builder();
    clog.filter(None, level);
    // A second init (tests driving `run` twice) keeps the first logger
    let _ = clog.try_init();
}

fn serve(mut config: Config, bind: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr = config.bind_addr();
    let listener = server::bind(&addr)?;
    info!("Listening on http://{}", addr);
    info!("Corpus: {}", format_path_with_tilde(&config.corpus_path()));
    if config.access_token().is_none() {
        warn!("No catalog token configured; /playlist requires an Authorization header");
    }
    server::serve(listener, Arc::new(ServerContext::from_config(&config)));
    Ok(())
}

fn format_record(record: &ConversationRecord) -> String {
    format!(
        "[{}] {}  ({} participants, {} messages, {} with links, last {})",
        record.chat_id,
        single_line(&record.display_name),
        record.participant_count,
        record.message_count,
        record.link_message_count,
        record.last_message_at.format("%Y-%m-%d %H:%M")
    )
}

fn print_record(record: &ConversationRecord, json: bool) {
    if json {
        match serde_json::to_string(record) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to encode record {}: {}", record.chat_id, e),
        }
    } else {
        println!("{}", format_record(record));
    }
}

fn search(
    config: &Config,
    filter: &str,
    server: Option<&str>,
    json: bool,
    timeout: Option<u64>,
) -> Result<()> {
    let request = parse_filter(filter)?;
    let compiled = compile(&request)?;

    let count = match server {
        Some(url) => {
            let mut coordinator = StreamCoordinator::new(Arc::new(HttpSource::new(url)));
            let observer: Observer = Box::new(move |event: &StreamEvent, _: &Projection| {
                if let StreamEvent::Result(record) = event {
                    print_record(record, json);
                }
            });
            let handle = coordinator.search(request, Some(observer))?;
            let projection = match timeout {
                Some(secs) => handle.wait_timeout(Duration::from_secs(secs)),
                None => handle.wait(),
            };
            if projection.skipped_lines > 0 {
                warn!("Skipped {} malformed stream lines", projection.skipped_lines);
            }
            match projection.phase {
                Phase::Complete => projection.results.len(),
                Phase::Error => {
                    let message = projection.error.unwrap_or_default();
                    bail!("Search failed after {} results: {}", projection.results.len(), message)
                }
                _ => bail!("Search timed out after {} results", projection.results.len()),
            }
        }
        None => {
            let corpus = SqliteCorpus::open(&config.corpus_path())?;
            let mut count = 0;
            for record in Conversations::new(&corpus, &compiled)? {
                print_record(&record?, json);
                count += 1;
            }
            count
        }
    };

    if !json {
        println!("{} conversations", count);
    }
    Ok(())
}

fn print_progress(update: &ProgressUpdate) {
    println!(
        "[{:>3}%] {}: {}",
        update.progress,
        update.stage.as_str(),
        single_line(&update.message)
    );
}

fn print_summary(summary: &PlaylistSummary) {
    println!();
    println!("Playlist: {} ({})", single_line(&summary.playlist.name), summary.playlist.url);
    println!("  Unique tracks found: {}", summary.tracks_found);
    println!("  Added: {}", summary.tracks_added);
    println!("  Skipped: {}", summary.tracks_skipped);
    println!("  Failed: {}", summary.tracks_failed);
    for failure in &summary.failures {
        println!("    {}: {}", single_line(&failure.track), single_line(&failure.reason));
    }
}

fn synthesize(
    config: &Config,
    request: PlaylistRequest,
    server: Option<&str>,
) -> Result<PlaylistSummary> {
    let token = config.access_token().map(str::to_string);

    let summary = match server {
        Some(url) => {
            let mut coordinator = StreamCoordinator::new(Arc::new(HttpSource::new(url)));
            let observer: Observer = Box::new(|event: &StreamEvent, _: &Projection| {
                if let StreamEvent::Progress(update) = event {
                    print_progress(update);
                }
            });
            let projection = coordinator.synthesize(request, token, Some(observer)).wait();
            match (projection.phase, projection.completion) {
                (Phase::Complete, Some(Completion::Playlist(summary))) => summary,
                (Phase::Complete, _) => bail!("Backend completed without a playlist summary"),
                _ => bail!("Synthesis failed: {}", projection.error.unwrap_or_default()),
            }
        }
        None => {
            let token = token.ok_or_else(|| {
                anyhow!("No catalog access token: set {} or catalog.access_token", TOKEN_ENV)
            })?;
            let corpus = SqliteCorpus::open(&config.corpus_path())?;
            let catalog = SpotifyCatalog::new(&config.catalog.api_base, &token, config.timeout());
            let synthesizer =
                Synthesizer::new(&corpus, &catalog).with_batch_size(config.batch_size());
            let mut run = PlaylistRun::new(request);
            let mut printer = |update: &ProgressUpdate| -> io::Result<()> {
                print_progress(update);
                Ok(())
            };
            match synthesizer.run(&mut run, &mut printer) {
                Ok(summary) => summary,
                Err(SynthesisError::Fatal(message)) => bail!("Synthesis failed: {}", message),
                Err(e @ SynthesisError::Cancelled) => return Err(e.into()),
            }
        }
    };

    print_summary(&summary);
    Ok(summary)
}

fn show_stats(config: &Config) -> Result<()> {
    let path = config.corpus_path();
    let corpus = SqliteCorpus::open(&path)
        .with_context(|| format!("Cannot read corpus at {}", format_path_with_tilde(&path)))?;
    let stats = corpus.stats()?;

    println!("Message Corpus Statistics");
    println!("=========================");
    println!("Conversations: {}", stats.conversations);
    println!("Messages: {}", stats.messages);
    println!("  With music links: {}", stats.link_messages);
    println!();
    println!("Corpus: {}", format_path_with_tilde(&path));

    if let Some(first) = stats.first_message_at {
        println!("Oldest message: {}", first.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(last) = stats.last_message_at {
        println!("Newest message: {}", last.format("%Y-%m-%d %H:%M:%S"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_synthesize_requires_exactly_one_target() {
        let both = Cli::try_parse_from([
            "chat-playlist-explorer",
            "synthesize",
            "--name",
            "Roadtrip",
            "--playlist-id",
            "abc",
            "--chat",
            "10",
        ]);
        assert!(both.is_err());

        let neither = Cli::try_parse_from(["chat-playlist-explorer", "synthesize", "--chat", "10"]);
        assert!(neither.is_err());

        let ok = Cli::try_parse_from([
            "chat-playlist-explorer",
            "synthesize",
            "--name",
            "Roadtrip",
            "--chat",
            "10",
            "--chat",
            "77",
            "--since",
            "2024-06-01",
        ])
        .unwrap();
        match ok.command {
            Some(Commands::Synthesize { chats, since, .. }) => {
                assert_eq!(chats, vec![10, 77]);
                assert_eq!(since, NaiveDate::from_ymd_opt(2024, 6, 1));
            }
            _ => panic!("expected synthesize"),
        }
    }

    #[test]
    fn test_invalid_date_flag_rejected() {
        let result = Cli::try_parse_from([
            "chat-playlist-explorer",
            "synthesize",
            "--name",
            "x",
            "--chat",
            "1",
            "--until",
            "2024-02-31",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_format_record_strips_escapes() {
        let record = ConversationRecord {
            chat_id: 77,
            display_name: "Road\x1b[2Jtrip\n!".to_string(),
            participant_count: 3,
            message_count: 12,
            link_message_count: 4,
            last_message_at: Utc.with_ymd_and_hms(2024, 6, 2, 18, 0, 0).unwrap(),
            participants: vec![],
        };
        assert_eq!(
            format_record(&record),
            "[77] Roadtrip !  (3 participants, 12 messages, 4 with links, last 2024-06-02 18:00)"
        );
    }
}
