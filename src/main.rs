use std::{
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use bytes::Bytes;
use clap::{Parser, Subcommand};
use miette::{miette, Context, IntoDiagnostic};
use serde::Serialize;
use stream_client::{
    ClientOptions, CloseFrame, Event, LifecycleListener, MaxRetries, RetryConfig, Retryable,
    SseConfig, SseHandler, StreamClient, StreamError, WsConfig, WsHandler,
};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "streamctl", version)]
#[command(about = "Tail a Server-Sent Events or WebSocket stream", long_about = Some("Tail a Server-Sent Events or WebSocket stream\n\nFrames are printed to stdout as JSON lines. Dropped connections are re-established according to the retry options."))]
struct Args {
    #[command(flatten)]
    retry: RetryArgs,
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE", value_parser = parse_header, global = true, help = "Extra request header, may be repeated")]
    headers: Vec<(String, String)>,
    #[arg(long, env = "STREAMCTL_READ_TIMEOUT_MS", default_value_t = 300_000, global = true, help = "Reconnect when an SSE stream is silent for this long")]
    read_timeout_ms: u64,
    #[arg(long, env = "STREAMCTL_WORKERS", default_value_t = 2, global = true)]
    workers: usize,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct RetryArgs {
    #[arg(long, env = "STREAMCTL_RETRY_INTERVAL_MS", default_value_t = 2000, global = true)]
    retry_interval_ms: u64,
    #[arg(long, env = "STREAMCTL_MAX_RETRIES", default_value = "-1", allow_hyphen_values = true, global = true, help = "Negative for unlimited")]
    max_retries: MaxRetries,
    #[arg(long, env = "STREAMCTL_NO_AUTO_RECONNECT", global = true, help = "Do not reconnect when the server closes the stream")]
    no_auto_reconnect: bool,
}

impl From<&RetryArgs> for RetryConfig {
    fn from(args: &RetryArgs) -> Self {
        RetryConfig::default()
            .retry_interval(Duration::from_millis(args.retry_interval_ms))
            .max_retries(args.max_retries)
            .auto_reconnect(!args.no_auto_reconnect)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a text/event-stream endpoint
    Sse {
        url: reqwest::Url,
        #[arg(long, help = "Resume after this event id")]
        last_event_id: Option<String>,
        #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath, env = "STREAMCTL_LAST_EVENT_ID_FILE", help = "Read the event id to resume from, and store the last one seen on exit")]
        last_event_id_file: Option<PathBuf>,
    },
    /// Read a WebSocket endpoint
    Ws {
        url: reqwest::Url,
        #[arg(long = "send", value_name = "TEXT", help = "Text frame sent every time the socket opens, may be repeated")]
        send: Vec<String>,
    },
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got {s:?}"))?;
    Ok((name.trim().to_owned(), value.trim().to_owned()))
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Output {
    Open,
    Event {
        id: Option<String>,
        event: String,
        data: String,
    },
    Comment {
        text: String,
    },
    Text {
        text: String,
    },
    Binary {
        len: usize,
    },
    Ping {
        len: usize,
    },
    Pong {
        len: usize,
    },
    Close {
        #[serde(skip_serializing_if = "Option::is_none")]
        last_event_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        message: String,
        fatal: bool,
    },
    FailedAttempt {
        attempt: u32,
        retry_in_ms: u64,
    },
    RetriesExceeded {
        message: String,
    },
}

/// Forwards every callback to the main task, which owns stdout
struct Printer {
    tx: mpsc::UnboundedSender<Output>,
}

impl Printer {
    fn emit(&self, output: Output) {
        // the receiver only goes away while we are exiting
        let _ = self.tx.send(output);
    }
}

impl LifecycleListener for Printer {
    fn on_error(&self, error: &StreamError) {
        self.emit(Output::Error {
            message: error.to_string(),
            fatal: !error.is_retryable(),
        });
    }

    fn on_failed_attempt(&self, attempt: u32, delay: Duration) {
        self.emit(Output::FailedAttempt {
            attempt,
            retry_in_ms: delay.as_millis() as u64,
        });
    }

    fn on_retries_exceeded(&self, error: &StreamError) {
        self.emit(Output::RetriesExceeded {
            message: error.to_string(),
        });
    }
}

impl SseHandler for Printer {
    fn on_open(&self) {
        self.emit(Output::Open);
    }

    fn on_event(&self, event: &Event) {
        self.emit(Output::Event {
            id: event.id.clone(),
            event: event.name.clone(),
            data: event.data.clone(),
        });
    }

    fn on_comment(&self, comment: &str) {
        self.emit(Output::Comment {
            text: comment.to_owned(),
        });
    }

    fn on_close(&self, last_event_id: Option<&str>) {
        self.emit(Output::Close {
            last_event_id: last_event_id.map(str::to_owned),
            code: None,
            reason: None,
        });
    }
}

impl WsHandler for Printer {
    fn on_open(&self) {
        self.emit(Output::Open);
    }

    fn on_text(&self, text: &str) {
        self.emit(Output::Text {
            text: text.to_owned(),
        });
    }

    fn on_binary(&self, data: &Bytes) {
        self.emit(Output::Binary { len: data.len() });
    }

    fn on_ping(&self, data: &Bytes) {
        self.emit(Output::Ping { len: data.len() });
    }

    fn on_pong(&self, data: &Bytes) {
        self.emit(Output::Pong { len: data.len() });
    }

    fn on_close(&self, frame: Option<&CloseFrame>) {
        self.emit(Output::Close {
            last_event_id: None,
            code: frame.map(|frame| frame.code),
            reason: frame.map(|frame| frame.reason.clone()),
        });
    }
}

#[tokio::main]
async fn main() -> Result<(), miette::Report> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(false)
                .context_lines(3)
                .tab_width(4)
                .build(),
        )
    }))?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let options = ClientOptions {
        worker_threads: args.workers,
        read_timeout: Duration::from_millis(args.read_timeout_ms),
        ..ClientOptions::default()
    };
    let client = StreamClient::new(options)?;
    let retry = RetryConfig::from(&args.retry);
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = Printer { tx };

    let result = match args.command {
        Command::Sse {
            url,
            last_event_id,
            last_event_id_file,
        } => {
            let mut config = SseConfig::new(url).retry(retry);
            config.headers = args.headers;
            let resume_from = match (last_event_id, last_event_id_file.as_deref()) {
                (Some(id), _) => Some(id),
                (None, Some(path)) => read_last_event_id(path)?,
                (None, None) => None,
            };
            if let Some(id) = resume_from {
                config = config.last_event_id(id);
            }
            let stream = client.sse(config, printer);
            stream.connect();
            let result = pump(rx, || {}).await;
            let last_event_id = stream.close();
            if let (Some(path), Some(id)) = (last_event_id_file, last_event_id) {
                write_last_event_id(&path, &id)
                    .await
                    .wrap_err("failed to store last event id")?;
            }
            result
        }
        Command::Ws { url, send } => {
            let mut config = WsConfig::new(url).retry(retry);
            config.headers = args.headers;
            let stream = client.ws(config, printer);
            stream.connect();
            let result = pump(rx, || {
                for text in &send {
                    if let Err(e) = stream.send_text(text.as_str()) {
                        debug!(error = %e, "could not send text frame");
                    }
                }
            })
            .await;
            stream.close();
            result
        }
    };
    client.shutdown();
    result
}

/// Prints outputs until Ctrl-C or the stream can no longer recover
async fn pump(
    mut rx: mpsc::UnboundedReceiver<Output>,
    mut on_open: impl FnMut(),
) -> Result<(), miette::Report> {
    let stdout = std::io::stdout();
    loop {
        let output = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, closing stream");
                return Ok(());
            }
            output = rx.recv() => match output {
                Some(output) => output,
                None => return Ok(()),
            },
        };
        {
            let mut out = stdout.lock();
            serde_json::to_writer(&mut out, &output).into_diagnostic()?;
            writeln!(out).into_diagnostic()?;
        }
        match output {
            Output::Open => on_open(),
            Output::RetriesExceeded { message } => return Err(miette!("{message}")),
            Output::Error {
                message,
                fatal: true,
            } => return Err(miette!("{message}")),
            _ => {}
        }
    }
}

fn read_last_event_id(path: &Path) -> Result<Option<String>, miette::Report> {
    match std::fs::read_to_string(path) {
        Ok(id) => Ok(Some(id.trim().to_owned()).filter(|id| !id.is_empty())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read {}", path.display())),
    }
}

#[instrument(target = "file_output", skip(id))]
async fn write_last_event_id(path: &Path, id: &str) -> Result<(), miette::Report> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).into_diagnostic()?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer.write_all(id.as_bytes()).into_diagnostic()?;
        writer.flush().into_diagnostic()?;
    }
    tmp.persist(path).map_err(|e| miette!(e.error))?;
    debug!("stored last event id");
    Ok(())
}
