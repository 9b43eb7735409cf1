use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use framestep::{
    ArchiveOptions, FfmpegLogLevel, ProgressCallback, ProgressInfo, SessionOptions, VideoMetadata,
    VideoSession, reconcile_timestamps, remux,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  framestep info recording.mp4 --json\n  framestep frame-info recording.mts --progress\n  framestep archive camera.mts archive.mp4 --progress\n  framestep completions zsh > _framestep";

#[derive(Debug, Parser)]
#[command(
    name = "framestep",
    version,
    about = "Inspect, scan, and archive frame-steppable video recordings",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar where supported.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print timing and embedded metadata for a recording (alias: probe).
    #[command(
        about = "Print recording timing and metadata",
        visible_alias = "probe",
        after_help = "Examples:\n  framestep info recording.mp4\n  framestep info recording.mp4 --json"
    )]
    Info {
        /// Input video path.
        input: PathBuf,

        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Scan every packet and print per-frame metadata.
    #[command(
        about = "Scan per-frame metadata",
        after_help = "Examples:\n  framestep frame-info recording.mts --progress\n  framestep frame-info recording.mts --json --limit 100"
    )]
    FrameInfo {
        /// Input video path.
        input: PathBuf,

        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,

        /// Print at most N frames (0 = all).
        #[arg(long, default_value_t = 0)]
        limit: u64,
    },

    /// Stream-copy a recording with reconciled timestamps embedded as tags.
    #[command(
        about = "Archive a recording with embedded metadata",
        after_help = "Examples:\n  framestep archive camera.mts archive.mp4\n  framestep archive camera.mts archive.mp4 --keep-audio --no-hash --progress"
    )]
    Archive {
        /// Input video path.
        input: PathBuf,
        /// Output container path (format inferred from extension).
        output: PathBuf,
        /// Copy audio streams as well.
        #[arg(long)]
        keep_audio: bool,
        /// Skip hashing the source file.
        #[arg(long)]
        no_hash: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "panic" => Some(FfmpegLogLevel::Panic),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "verbose" => Some(FfmpegLogLevel::Verbose),
        "debug" => Some(FfmpegLogLevel::Debug),
        "trace" => Some(FfmpegLogLevel::Trace),
        _ => None,
    }
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = &global.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        framestep::set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        let style =
            ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(total) = info.total {
            self.bar.set_length(total);
        }
        self.bar.set_position(info.current);
    }
}

fn timing_summary(session: &VideoSession, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let timing = session.timing();
    if json {
        let payload = json!({
            "frame_count": timing.frame_count(),
            "fps": timing.fps(),
            "duration_seconds": timing.duration_seconds(),
            "start_tick": timing.start_tick,
            "frame_duration_ticks": timing.frame_duration_ticks,
            "max_gop_length": timing.max_gop_length,
            "annex_b": timing.is_annex_b,
            "embedded_metadata": session.container_metadata().map(|metadata| json!({
                "hash": metadata.hash,
                "record_fps": metadata.record_fps,
                "number_of_frames": metadata.number_of_frames,
                "start_timestamps": metadata.start_timestamps.len(),
            })),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "Frames: {} @ {:.3} fps ({:.1}s)",
            timing.frame_count(),
            timing.fps(),
            timing.duration_seconds()
        );
        println!(
            "Timing: start_tick={} frame_duration={} ticks, max GOP {}",
            timing.start_tick, timing.frame_duration_ticks, timing.max_gop_length
        );
        println!(
            "Bitstream: {}",
            if timing.is_annex_b {
                "Annex B"
            } else {
                "length-prefixed"
            }
        );
        match session.container_metadata() {
            Some(metadata) => {
                println!(
                    "Embedded metadata: {} Hz record rate, {} timestamp anchor(s){}",
                    metadata.record_fps,
                    metadata.start_timestamps.len(),
                    metadata
                        .hash
                        .as_deref()
                        .map(|hash| format!(", source hash {}...", &hash[..hash.len().min(12)]))
                        .unwrap_or_default()
                );
            }
            None => println!("Embedded metadata: none"),
        }
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Info { input, json } => {
            let session = VideoSession::open(&input, SessionOptions::default())?;
            timing_summary(&session, json)?;
        }
        Commands::FrameInfo { input, json, limit } => {
            let session = VideoSession::open(&input, SessionOptions::default())?;

            let progress_bar = if cli.global.progress {
                Some(Arc::new(TerminalProgress::new()?))
            } else {
                None
            };
            let callback = progress_bar
                .clone()
                .map(|bar| bar as Arc<dyn ProgressCallback>);
            let info = session.scan_frame_info(callback, None)?;
            if let Some(bar) = &progress_bar {
                bar.finish();
            }

            let shown = info
                .iter()
                .take(if limit == 0 { usize::MAX } else { limit as usize });
            if json {
                let payload: Vec<_> = shown
                    .map(|(frame_number, frame)| {
                        json!({
                            "frame": frame_number,
                            "pts": frame.pts,
                            "dts": frame.dts,
                            "type": frame.frame_type.map(|t| t.to_string()),
                            "timestamp": frame.timestamp.as_ref().map(|t| t.to_string()),
                            "start_byte": frame.start_byte,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                for (frame_number, frame) in shown {
                    println!(
                        "frame {frame_number:>7}  {:>3}  pts={:<12} {}",
                        frame
                            .frame_type
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "?".to_string()),
                        frame.pts,
                        frame
                            .timestamp
                            .as_ref()
                            .map(|t| t.to_string())
                            .unwrap_or_default()
                    );
                }
                match reconcile_timestamps(&info) {
                    Ok(table) => println!(
                        "{} {}",
                        "reconciled:".green().bold(),
                        format!(
                            "{} fps record rate, {} timestamp anchor(s)",
                            table.record_fps,
                            table.start_timestamps.len()
                        )
                        .green()
                    ),
                    Err(error) => eprintln!(
                        "{} {}",
                        "warning:".yellow().bold(),
                        format!("timestamps not reconciled: {error}").yellow()
                    ),
                }
            }
        }
        Commands::Archive {
            input,
            output,
            keep_audio,
            no_hash,
        } => {
            ensure_writable_path(&output, cli.global.overwrite)?;

            let session = VideoSession::open(&input, SessionOptions::default())?;

            let progress_bar = if cli.global.progress {
                Some(Arc::new(TerminalProgress::new()?))
            } else {
                None
            };
            let callback = progress_bar
                .clone()
                .map(|bar| bar as Arc<dyn ProgressCallback>);

            if cli.global.verbose {
                eprintln!("scanning {}", input.display());
            }
            let info = session.scan_frame_info(callback.clone(), None)?;
            let table = reconcile_timestamps(&info)?;

            let hash = if no_hash {
                None
            } else {
                if cli.global.verbose {
                    eprintln!("hashing {}", input.display());
                }
                Some(remux::content_hash(&input)?)
            };

            let timing = session.timing();
            let metadata = VideoMetadata::from_table(
                table,
                hash,
                timing.frame_count(),
                timing.fps(),
                timing.start_tick,
            );

            let mut options = ArchiveOptions::default();
            if keep_audio {
                options = options.keep_audio();
            }
            if let Some(callback) = callback {
                options = options.with_progress(callback);
            }
            remux::archive(&input, &output, &metadata, &options)?;
            if let Some(bar) = &progress_bar {
                bar.finish();
            }

            println!("{} {}", "saved".green().bold(), output.display());
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framestep", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::parse_log_level;

    #[test]
    fn parse_log_level_aliases() {
        assert!(parse_log_level("quiet").is_some());
        assert!(parse_log_level("WARN").is_some());
        assert!(parse_log_level("trace").is_some());
        assert!(parse_log_level("chatty").is_none());
    }
}
