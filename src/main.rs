//! framehook command line
//!
//! - `framehook check <project>` validates a project file and its script
//! - `framehook replay <project> <capture>` feeds a captured byte stream
//!   through the full pipeline, with sinks replaced by logging dry-run
//!   clients, and prints every dispatched message as a JSON line

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use framehook::{
    config::{LoggingConfig, ProjectConfig},
    hooks::{AcceptAll, Hook},
    pipeline::{ConnectionId, HookFactory, PipelineMessage, Runtime},
    scripting::ScriptHookFactory,
    sink::{
        EventSink, LoggingSinkClient, SinkEvent, SinkGateway, HTTP_SINK, INFLUX_SINK, KV_SINK,
        TIMESCALE_SINK,
    },
};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "framehook",
    version,
    about = "Frame decoding and hook dispatch for IoT byte streams"
)]
struct Cli {
    /// Log filter directive, overrides the project's `logging.level`.
    #[arg(long, env = "FRAMEHOOK_LOG", global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a project file and compile its hook script.
    Check {
        /// Project file (.toml or .json).
        project: PathBuf,
    },
    /// Replay a capture through the pipeline with dry-run sinks.
    Replay {
        /// Project file (.toml or .json).
        project: PathBuf,

        /// Raw capture file.
        capture: PathBuf,

        /// Feed the capture in chunks of this many bytes.
        #[arg(long, default_value_t = 64)]
        chunk: usize,

        /// The capture is hex text instead of raw bytes.
        #[arg(long)]
        hex: bool,

        /// Endpoint name reported in logs.
        #[arg(long, default_value = "replay")]
        endpoint: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Check { project } => {
            let config = load_project(&project)?;
            let _guard = init_logging(&config.logging, cli.log.as_deref())?;
            check(&project, &config)
        }
        Command::Replay {
            project,
            capture,
            chunk,
            hex,
            endpoint,
        } => {
            let config = load_project(&project)?;
            let _guard = init_logging(&config.logging, cli.log.as_deref())?;
            replay(&project, &config, &capture, chunk, hex, &endpoint)
        }
    }
}

fn load_project(path: &Path) -> Result<ProjectConfig> {
    ProjectConfig::load(path).with_context(|| format!("loading project {}", path.display()))
}

fn init_logging(config: &LoggingConfig, filter: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = match filter {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .context("invalid logging.level")?,
    };

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let Some(name) = path.file_name() else {
                bail!("logging.file {:?} has no file name", path);
            };
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn hook_factory(project: &Path, config: &ProjectConfig) -> Result<Box<dyn HookFactory>> {
    match config.script_path(project) {
        Some(script) => {
            let factory = ScriptHookFactory::load(&script)
                .with_context(|| format!("compiling {}", script.display()))?;
            Ok(Box::new(factory))
        }
        None => Ok(Box::new(|_: ConnectionId| -> framehook::Result<Box<dyn Hook>> {
            Ok(Box::new(AcceptAll))
        })),
    }
}

fn check(project: &Path, config: &ProjectConfig) -> Result<()> {
    let layout = config.validate()?;
    hook_factory(project, config)?;

    println!("project:   {}", config.name);
    println!("prefix:    {}", hex::encode(layout.prefix()));
    println!("header:    {} bytes", layout.header_size());
    println!("length:    {:?}", config.frame.length_field);
    match layout.fixed_payload_size() {
        Some(size) => println!("payload:   {} bytes", size),
        None => println!("payload:   up to {} bytes", layout.max_payload_size()),
    }
    println!(
        "checksum:  {:?} ({} bytes)",
        config.frame.checksum.algorithm,
        layout.checksum_width()
    );
    println!("tailer:    {} bytes", layout.tailer_length());
    println!("timer:     {} ms", config.dispatcher.timer_period_ms);
    match config.script_path(project) {
        Some(script) => println!("script:    {}", script.display()),
        None => println!("script:    none (frames are accepted as-is)"),
    }
    println!("ok");
    Ok(())
}

fn replay(
    project: &Path,
    config: &ProjectConfig,
    capture: &Path,
    chunk: usize,
    hex_input: bool,
    endpoint: &str,
) -> Result<()> {
    let bytes = read_capture(capture, hex_input)?;
    let factory = hook_factory(project, config)?;

    let (events, event_rx) = EventSink::new();
    let mut builder = SinkGateway::builder(config.gateway_config()).events(events);
    for name in [HTTP_SINK, KV_SINK, INFLUX_SINK, TIMESCALE_SINK] {
        builder = builder.sink(name, LoggingSinkClient::new(name));
    }
    let gateway = builder.build().context("starting sink workers")?;

    let (mut runtime, bridge) = Runtime::new(config.runtime_config()?, gateway, move |id| {
        factory.create(id)
    });

    let printer = std::thread::Builder::new()
        .name("replay-output".to_string())
        .spawn(move || {
            for msg in bridge.msg_rx.iter() {
                print_message(&msg);
            }
        })?;

    tracing::info!(bytes = bytes.len(), chunk, "replaying {}", capture.display());
    let conn = runtime.open(endpoint)?;
    for piece in bytes.chunks(chunk.max(1)) {
        conn.feed(piece)?;
    }
    let stats = conn.close()?;
    runtime.shutdown();
    drop(runtime);
    if printer.join().is_err() {
        tracing::error!("output thread panicked");
    }

    let failures = event_rx
        .try_iter()
        .filter(|e| matches!(e, SinkEvent::Failed { .. }))
        .count();
    eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    if failures > 0 {
        eprintln!("{} asynchronous sink call(s) failed", failures);
    }
    Ok(())
}

fn read_capture(path: &Path, hex_input: bool) -> Result<Vec<u8>> {
    if hex_input {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading capture {}", path.display()))?;
        let digits: String = text.split_whitespace().collect();
        hex::decode(digits).with_context(|| format!("{} is not valid hex", path.display()))
    } else {
        std::fs::read(path).with_context(|| format!("reading capture {}", path.display()))
    }
}

fn print_message(msg: &PipelineMessage) {
    match msg {
        PipelineMessage::Dispatched { message, signal } => {
            match serde_json::to_string(message.as_ref()) {
                Ok(json) => println!("{{\"signal\":\"{:?}\",\"message\":{}}}", signal, json),
                Err(e) => tracing::warn!("cannot serialize message: {}", e),
            }
        }
        PipelineMessage::Outbound { connection, bytes } => {
            println!(
                "{{\"outbound\":{{\"connection\":{},\"bytes\":\"{}\"}}}}",
                connection.0,
                hex::encode(bytes)
            );
        }
        PipelineMessage::Started { .. } | PipelineMessage::Stopped { .. } => {}
    }
}
