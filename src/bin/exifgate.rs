//! exifgate - image metadata stripping CLI
//!
//! Runs the transformation handler against local files or a recorded
//! object-lambda event.
//!
//! ## Usage
//!
//! ```sh
//! exifgate strip <file> [--out <path>]
//! exifgate metadata <file> [--out <path>]
//! exifgate event <event.json> [--out <path>]
//! exifgate segments <file>
//! ```
//!
//! Payloads go to stdout unless `--out` is given; logs go to stderr.

use exifgate::constants::{ENV_LOG, ENV_LOG_FORMAT};
use exifgate::{
    FileOrigin, FileWriteBack, HandlerConfig, HttpOrigin, MemoryWriteBack, ObjectLambdaEvent,
    Origin, OriginObjectReference, ResponseHead, SegmentKind, TransformationHandler,
    TransformationRequest,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Exit Codes
// =============================================================================

const EXIT_USAGE: u8 = 1;
const EXIT_FAILED: u8 = 2;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Strip { file: PathBuf, out: Option<PathBuf> },
    Metadata { file: PathBuf, out: Option<PathBuf> },
    Event { event: PathBuf, out: Option<PathBuf> },
    Segments { file: PathBuf },
    Version,
    Help,
}

fn parse_out(args: &[String]) -> Result<Option<PathBuf>, String> {
    let mut out = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--out" | "-o" => {
                if i + 1 < args.len() {
                    out = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    return Err("--out requires a path".to_string());
                }
            }
            other => return Err(format!("unexpected argument: {}", other)),
        }
    }
    Ok(out)
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    let input = |name: &str| -> Result<PathBuf, String> {
        args.get(2)
            .map(PathBuf::from)
            .ok_or_else(|| format!("{} requires <file>", name))
    };
    let rest = args.get(3..).unwrap_or_default();

    match args[1].as_str() {
        "strip" => Ok(Command::Strip {
            file: input("strip")?,
            out: parse_out(rest)?,
        }),
        "metadata" => Ok(Command::Metadata {
            file: input("metadata")?,
            out: parse_out(rest)?,
        }),
        "event" => Ok(Command::Event {
            event: input("event")?,
            out: parse_out(rest)?,
        }),
        "segments" => Ok(Command::Segments {
            file: input("segments")?,
        }),
        "version" | "--version" | "-v" => Ok(Command::Version),
        "help" | "--help" | "-h" => Ok(Command::Help),
        unknown => Err(format!("unknown command: {}", unknown)),
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Splits a local path into a file origin rooted at its directory and the
/// key of the file within it.
fn local_origin(file: &Path, config: &HandlerConfig) -> Result<(FileOrigin, String), String> {
    let key = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("not a file path: {}", file.display()))?
        .to_string();
    let dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let origin = FileOrigin::new(dir).with_chunk_size(config.read_chunk_size);
    Ok((origin, key))
}

async fn run_request(
    origin: Arc<dyn Origin>,
    config: HandlerConfig,
    request: TransformationRequest,
    out: Option<PathBuf>,
) -> Result<(), String> {
    let handler = TransformationHandler::new(origin, config);

    match out {
        Some(path) => {
            let writeback = FileWriteBack::new(path);
            let outcome = handler.handle(request, &writeback).await;
            if outcome.is_success() {
                eprintln!(
                    "Wrote {} bytes to {}",
                    outcome.bytes_written,
                    writeback.path().display()
                );
                return Ok(());
            }
            let head = writeback.last_head().map_err(|e| e.to_string())?;
            Err(describe_failure(head.as_ref(), outcome.failure()))
        }
        None => {
            let writeback = MemoryWriteBack::new();
            let outcome = handler.handle(request, &writeback).await;
            let response = writeback.single().map_err(|e| e.to_string())?;
            match response {
                Some(response) if outcome.is_success() => {
                    let mut stdout = std::io::stdout().lock();
                    stdout
                        .write_all(&response.body)
                        .and_then(|_| stdout.flush())
                        .map_err(|e| format!("failed to write stdout: {}", e))
                }
                other => Err(describe_failure(
                    other.as_ref().map(|r| &r.head),
                    outcome.failure(),
                )),
            }
        }
    }
}

fn describe_failure(
    head: Option<&ResponseHead>,
    reason: Option<exifgate::FailureReason>,
) -> String {
    let reason = reason
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unknown failure".to_string());
    match head {
        Some(head) => format!(
            "{}: {} {} {}",
            reason,
            head.status,
            head.error_code.as_deref().unwrap_or("-"),
            head.error_message.as_deref().unwrap_or("")
        ),
        None => reason,
    }
}

async fn cmd_transform(file: PathBuf, out: Option<PathBuf>, show_metadata: bool) -> Result<(), String> {
    let config = HandlerConfig::from_env().map_err(|e| e.to_string())?;
    let (origin, key) = local_origin(&file, &config)?;
    let request = TransformationRequest::new(OriginObjectReference::new(key), show_metadata);
    run_request(Arc::new(origin), config, request, out).await
}

async fn cmd_event(event: PathBuf, out: Option<PathBuf>) -> Result<(), String> {
    let config = HandlerConfig::from_env().map_err(|e| e.to_string())?;
    let data = tokio::fs::read(&event)
        .await
        .map_err(|e| format!("failed to read {}: {}", event.display(), e))?;
    let event = ObjectLambdaEvent::from_json(&data).map_err(|e| e.to_string())?;
    debug!("Response target: {:?}", event.write_back_target());

    let origin = HttpOrigin::new().map_err(|e| e.to_string())?;
    let request = event.into_request(&config.show_metadata_param);
    run_request(Arc::new(origin), config, request, out).await
}

async fn cmd_segments(file: PathBuf) -> Result<(), String> {
    let config = HandlerConfig::from_env().map_err(|e| e.to_string())?;
    let (origin, key) = local_origin(&file, &config)?;
    let handler = TransformationHandler::new(Arc::new(origin.clone()), config);
    let deadline = handler.deadline();

    let source = origin
        .open(&OriginObjectReference::new(key))
        .await
        .map_err(|e| e.to_string())?;
    let document = exifgate::container::decode(&*source, &deadline)
        .await
        .map_err(|e| e.to_string())?;

    println!("{} ({} bytes)", document.format(), document.source_len());
    println!("OFFSET\tLENGTH\tLABEL\tKIND");
    for segment in document.segments() {
        let kind = match segment.kind {
            SegmentKind::ImageData => "image-data".to_string(),
            SegmentKind::Metadata(kind) => format!("metadata:{}", kind.name()),
            SegmentKind::Other => "other".to_string(),
        };
        println!(
            "{}\t{}\t{}\t{}",
            segment.range.start, segment.range.len, segment.label, kind
        );
    }
    Ok(())
}

fn cmd_version() {
    println!("exifgate version {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"exifgate - strip or extract image metadata without decoding pixels

USAGE:
    exifgate <command> [options]

COMMANDS:
    strip <file>          Write the image without metadata
    metadata <file>       Write the metadata as JSON
    event <event.json>    Serve a recorded object-lambda event
    segments <file>       List the container's segments
    version               Show version info
    help                  Show this help

OPTIONS:
    --out, -o <path>      Write the payload to a file instead of stdout

ENVIRONMENT:
    EXIFGATE_LOG          Log filter (default: info)
    EXIFGATE_LOG_FORMAT   Set to "json" for JSON logs
    EXIFGATE_BUDGET_MS    Invocation budget in milliseconds

EXAMPLES:
    exifgate strip photo.jpg --out clean.jpg
    exifgate metadata photo.jpg
    exifgate segments photo.png
"#
    );
}

// =============================================================================
// Main
// =============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn main() -> ExitCode {
    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            return ExitCode::from(EXIT_FAILED);
        }
    };

    let result = runtime.block_on(async {
        match cmd {
            Command::Strip { file, out } => cmd_transform(file, out, false).await,
            Command::Metadata { file, out } => cmd_transform(file, out, true).await,
            Command::Event { event, out } => cmd_event(event, out).await,
            Command::Segments { file } => cmd_segments(file).await,
            Command::Version => {
                cmd_version();
                Ok(())
            }
            Command::Help => {
                cmd_help();
                Ok(())
            }
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(EXIT_FAILED)
        }
    }
}
