//! Ferry - Command-line interface for the file transfer engine.
//!
//! Copies files and directories into an existing destination directory,
//! rendering progress on stderr. Ctrl-C cancels at the next chunk boundary.

use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use engine::{
    spawn_transfer, CancellationToken, ChecksumAlgorithm, EngineError, FileState, ProgressEvent,
    ProgressSnapshot, SourceEntry, TransferOptions, TransferResult, TransferStatus,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Ferry - copy files and folders with progress and verification
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(version)]
#[command(about = "Copy files and directories with progress tracking and checksum verification")]
struct Args {
    /// Files and directories to copy
    #[arg(value_name = "SOURCE", required = true)]
    sources: Vec<PathBuf>,

    /// Destination directory (must already exist)
    #[arg(short, long, value_name = "DIR")]
    dest: PathBuf,

    /// Put every file directly in the destination instead of recreating folders
    #[arg(long)]
    flat: bool,

    /// Replace existing files instead of writing name_1.ext, name_2.ext, ...
    #[arg(long)]
    overwrite: bool,

    /// Skip checksum verification after each copy
    #[arg(long)]
    no_verify: bool,

    /// Checksum algorithm for verification: md5, sha256, blake3
    #[arg(long, value_name = "ALGORITHM", default_value = "md5")]
    hash: String,

    /// Do not copy source modification times
    #[arg(long)]
    no_preserve_mtime: bool,

    /// Print the final summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose output (per-file lines, debug logging)
    #[arg(short, long)]
    verbose: bool,
}

/// Renders ProgressEvents on stderr
struct CliProgress {
    verbose: bool,
    snapshot: ProgressSnapshot,
    last_progress_update: Option<Instant>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            snapshot: ProgressSnapshot::new(),
            last_progress_update: None,
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn progress_bar(percent: f64) -> String {
        let percent = percent.clamp(0.0, 100.0) as u32;
        let filled = (percent / 5) as usize;
        let empty = 20 - filled;
        format!("[{}{}] {:3}%", "=".repeat(filled), " ".repeat(empty), percent)
    }

    fn handle(&mut self, event: &ProgressEvent) {
        self.snapshot.apply(event);

        match event {
            ProgressEvent::RunStarted {
                files_total,
                total_bytes,
                ..
            } => {
                eprintln!(
                    "Transferring {} files ({})...",
                    files_total,
                    Self::format_bytes(*total_bytes)
                );
            }
            ProgressEvent::EntrySkipped { path, error } => {
                eprintln!("Skipping {}: {}", path.display(), error);
            }
            ProgressEvent::FileStarted { index, file_name, .. } => {
                if self.verbose {
                    eprintln!("\r[{:3}] Copying: {}", index, file_name);
                }
            }
            ProgressEvent::ChunkCopied { .. } => {
                // Throttle progress updates to avoid spam (max once per 200ms)
                if let Some(last) = self.last_progress_update {
                    if last.elapsed() < Duration::from_millis(200) {
                        return;
                    }
                }
                self.last_progress_update = Some(Instant::now());
                self.render_line();
            }
            ProgressEvent::FileFinished {
                index,
                file_name,
                state,
                destination,
                error,
            } => match state {
                FileState::Failed => {
                    eprintln!(
                        "\r[{:3}] Failed: {}: {}",
                        index,
                        file_name,
                        error.as_deref().unwrap_or("unknown error")
                    );
                }
                _ if self.verbose => {
                    eprintln!("\r[{:3}] {}: {} -> {}", index, state, file_name, destination.display());
                }
                _ => {}
            },
            ProgressEvent::RunFinished { .. } => {
                self.render_line();
                eprintln!();
            }
        }
    }

    fn render_line(&self) {
        let s = &self.snapshot;
        eprint!(
            "\rProgress: {} | {} ({}/{})",
            Self::progress_bar(s.overall_percent),
            s.current_file_name,
            Self::format_bytes(s.current_file_bytes),
            Self::format_bytes(s.current_file_size)
        );
        let _ = std::io::stderr().flush();
    }

    fn print_summary(result: &TransferResult) {
        match result.status {
            TransferStatus::Completed => eprintln!("Transfer complete!"),
            TransferStatus::CompletedWithErrors => eprintln!("Transfer finished with errors."),
            TransferStatus::Cancelled => eprintln!("Transfer cancelled."),
        }

        eprintln!(
            "Summary: {}/{} files copied, {} failed, {} entries skipped",
            result.files_copied,
            result.files_total,
            result.failures.len(),
            result.entry_failures.len()
        );
        eprintln!(
            "Bytes copied: {} of {}",
            Self::format_bytes(result.bytes_copied),
            Self::format_bytes(result.total_bytes)
        );
        eprintln!(
            "Elapsed: {}",
            Self::format_duration(Duration::from_millis(result.elapsed_ms))
        );

        if !result.failures.is_empty() {
            eprintln!();
            eprintln!("Failed files:");
            for failure in &result.failures {
                eprintln!("  {}: {}", failure.source_path.display(), failure.message);
            }
        }

        if !result.entry_failures.is_empty() {
            eprintln!();
            eprintln!("Skipped entries:");
            for failure in &result.entry_failures {
                eprintln!("  {}: {}", failure.path.display(), failure.message);
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn exit_code(status: TransferStatus) -> i32 {
    match status {
        TransferStatus::Completed => 0,
        TransferStatus::CompletedWithErrors => 1,
        TransferStatus::Cancelled => 130,
    }
}

/// Parse and validate command-line arguments, then run the transfer
fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nCancelling transfer...");
        handler_token.cancel();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; cancellation unavailable");
    }

    let code = match run_cli(&args, cancel) {
        Ok(result) => {
            if args.json {
                match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("Error: failed to encode summary: {}", e),
                }
            }
            exit_code(result.status)
        }
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(code);
}

fn absolutize(path: &Path) -> Result<PathBuf, String> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| format!("Cannot resolve {}: {}", path.display(), e))
}

fn fatal_message(context: &str, err: &EngineError) -> String {
    match err.raw_os_error() {
        Some(code) => format!("{}: {} (os error {})", context, err, code),
        None => format!("{}: {}", context, err),
    }
}

fn build_options(args: &Args) -> Result<TransferOptions, String> {
    let checksum_algorithm = args.hash.parse::<ChecksumAlgorithm>()?;

    Ok(TransferOptions {
        verify_checksum: !args.no_verify,
        preserve_structure: !args.flat,
        overwrite_existing: args.overwrite,
        checksum_algorithm,
        preserve_mtime: !args.no_preserve_mtime,
        ..TransferOptions::default()
    })
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args, cancel: CancellationToken) -> Result<TransferResult, String> {
    let options = build_options(args)?;

    let sources = args
        .sources
        .iter()
        .map(|p| absolutize(p).map(SourceEntry::detect))
        .collect::<Result<Vec<_>, _>>()?;
    let destination = absolutize(&args.dest)?;

    debug!(
        sources = sources.len(),
        destination = %destination.display(),
        ?options,
        "starting transfer"
    );

    let handle = spawn_transfer(sources, &destination, options, cancel)
        .map_err(|e| fatal_message("Transfer could not start", &e))?;
    debug!(run_id = %handle.run_id(), "transfer worker started");

    let mut progress = CliProgress::new(args.verbose);
    for event in handle.events() {
        progress.handle(&event);
    }

    let result = handle
        .wait()
        .map_err(|e| fatal_message("Transfer failed", &e))?;

    CliProgress::print_summary(&result);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(sources: Vec<PathBuf>, dest: PathBuf) -> Args {
        Args {
            sources,
            dest,
            flat: false,
            overwrite: false,
            no_verify: false,
            hash: "md5".to_string(),
            no_preserve_mtime: false,
            json: false,
            verbose: false,
        }
    }

    #[test]
    fn test_args_parse() {
        let parsed = Args::try_parse_from([
            "ferry", "--dest", "/out", "--flat", "--hash", "blake3", "/a", "/b",
        ])
        .expect("Arguments should parse");
        assert_eq!(parsed.sources, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(parsed.flat);
        assert_eq!(parsed.hash, "blake3");

        assert!(Args::try_parse_from(["ferry", "--dest", "/out"]).is_err());
    }

    #[test]
    fn test_cli_copies_directory_with_structure() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let docs = src_dir.path().join("docs");
        std::fs::create_dir_all(docs.join("sub")).expect("Failed to create dirs");
        std::fs::write(docs.join("a.txt"), "hello").expect("Failed to write file");
        std::fs::write(docs.join("sub").join("b.txt"), "world").expect("Failed to write file");

        let result = run_cli(
            &args(vec![docs], dst_dir.path().to_path_buf()),
            CancellationToken::new(),
        )
        .expect("CLI should succeed");

        assert_eq!(result.status, TransferStatus::Completed);
        assert_eq!(result.files_copied, 2);
        assert!(dst_dir.path().join("docs").join("sub").join("b.txt").is_file());
    }

    #[test]
    fn test_cli_flat_mode_with_sha256() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let docs = src_dir.path().join("docs");
        std::fs::create_dir_all(docs.join("sub")).expect("Failed to create dirs");
        std::fs::write(docs.join("sub").join("b.txt"), "world").expect("Failed to write file");

        let mut cli_args = args(vec![docs], dst_dir.path().to_path_buf());
        cli_args.flat = true;
        cli_args.hash = "sha256".to_string();

        let result = run_cli(&cli_args, CancellationToken::new()).expect("CLI should succeed");

        assert_eq!(result.status, TransferStatus::Completed);
        assert!(dst_dir.path().join("b.txt").is_file());
    }

    #[test]
    fn test_cli_missing_source_is_not_fatal() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let present = src_dir.path().join("present.txt");
        std::fs::write(&present, "x").expect("Failed to write file");

        let result = run_cli(
            &args(
                vec![present, PathBuf::from("/nonexistent/path")],
                dst_dir.path().to_path_buf(),
            ),
            CancellationToken::new(),
        )
        .expect("Run should complete");

        assert_eq!(result.status, TransferStatus::CompletedWithErrors);
        assert_eq!(result.files_copied, 1);
        assert_eq!(result.entry_failures.len(), 1);
        assert_eq!(exit_code(result.status), 1);
    }

    #[test]
    fn test_cli_rejects_missing_destination() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::write(src_dir.path().join("a.txt"), "a").expect("Failed to write file");

        let result = run_cli(
            &args(
                vec![src_dir.path().join("a.txt")],
                src_dir.path().join("no-such-dir"),
            ),
            CancellationToken::new(),
        );
        assert!(result.is_err(), "CLI should reject a missing destination");
    }

    #[test]
    fn test_cli_rejects_invalid_hash_algorithm() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");

        let mut cli_args = args(vec![src_dir.path().to_path_buf()], dst_dir.path().to_path_buf());
        cli_args.hash = "crc32".to_string();

        let result = run_cli(&cli_args, CancellationToken::new());
        assert!(result.is_err(), "CLI should reject invalid hash algorithm");
    }

    #[test]
    fn test_cli_cancelled_run() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::write(src_dir.path().join("a.txt"), "a").expect("Failed to write file");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_cli(
            &args(vec![src_dir.path().join("a.txt")], dst_dir.path().to_path_buf()),
            cancel,
        )
        .expect("Cancelled run still returns a result");

        assert_eq!(result.status, TransferStatus::Cancelled);
        assert_eq!(exit_code(result.status), 130);
    }

    #[test]
    fn test_build_options_maps_flags() {
        let mut cli_args = args(vec![PathBuf::from("/a")], PathBuf::from("/out"));
        cli_args.no_verify = true;
        cli_args.overwrite = true;
        cli_args.no_preserve_mtime = true;

        let options = build_options(&cli_args).expect("Options should build");
        assert!(!options.verify_checksum);
        assert!(options.overwrite_existing);
        assert!(options.preserve_structure);
        assert!(!options.preserve_mtime);
        assert_eq!(options.checksum_algorithm, ChecksumAlgorithm::Md5);
    }

    #[test]
    fn test_fatal_message_includes_os_error_code() {
        let err = EngineError::DestinationUnavailable {
            path: PathBuf::from("/missing"),
            source: std::io::Error::from_raw_os_error(2),
        };
        assert_eq!(
            fatal_message("Transfer could not start", &err),
            "Transfer could not start: Destination directory unavailable: /missing (os error 2)"
        );
        assert_eq!(
            fatal_message("Transfer could not start", &EngineError::NoSources),
            "Transfer could not start: No sources selected"
        );
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(CliProgress::format_bytes(512), "512.00 B");
        assert_eq!(CliProgress::format_bytes(2048), "2.00 KB");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(CliProgress::progress_bar(50.0), "[==========          ]  50%");
    }

    #[test]
    fn test_summary_serializes_to_json() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::write(src_dir.path().join("a.txt"), "a").expect("Failed to write file");

        let result = run_cli(
            &args(vec![src_dir.path().join("a.txt")], dst_dir.path().to_path_buf()),
            CancellationToken::new(),
        )
        .expect("CLI should succeed");

        let json: serde_json::Value =
            serde_json::to_value(&result).expect("Summary should serialize");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["files_copied"], 1);
    }
}
