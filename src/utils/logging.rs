use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{self, Layer};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use crate::config::LoggingConfig;

/// Target for info-level events that should render as `SUCCESS`.
pub const SUCCESS_TARGET: &str = "discord_mirror::success";

const ANSI_RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn of(level: &Level, target: &str) -> Self {
        if *level == Level::ERROR {
            Severity::Error
        } else if *level == Level::WARN {
            Severity::Warning
        } else if *level == Level::INFO {
            if target == SUCCESS_TARGET {
                Severity::Success
            } else {
                Severity::Info
            }
        } else if *level == Level::DEBUG {
            Severity::Debug
        } else {
            Severity::Trace
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Success => "SUCCESS",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Severity::Success => "\x1b[32m",
            Severity::Warning => "\x1b[33m",
            Severity::Error => "\x1b[31m",
            Severity::Info => "\x1b[37m",
            Severity::Debug | Severity::Trace => "\x1b[90m",
        }
    }
}

/// Renders every event once as `[timestamp] (UUID : id) SEVERITY: message`
/// and writes that line to the console and, for errors, to the error log.
///
/// Both copies carry the same id, so a line in the error log can be found
/// again in the console output.
pub struct MirrorLayer<C, E> {
    console: C,
    ansi: bool,
    error_log: Option<E>,
}

impl<C, E> MirrorLayer<C, E> {
    pub fn new(console: C, ansi: bool, error_log: Option<E>) -> Self {
        Self {
            console,
            ansi,
            error_log,
        }
    }
}

impl<S, C, E> Layer<S> for MirrorLayer<C, E>
where
    S: Subscriber,
    C: for<'a> MakeWriter<'a> + 'static,
    E: for<'a> MakeWriter<'a> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: layer::Context<'_, S>) {
        let metadata = event.metadata();
        let severity = Severity::of(metadata.level(), metadata.target());

        let mut fields = FieldCollector::default();
        event.record(&mut fields);
        let line = format!("{} {}: {}", line_prefix(), severity.label(), fields.finish());

        let console_line = if self.ansi {
            format!("{}{line}{ANSI_RESET}\n", severity.color())
        } else {
            format!("{line}\n")
        };
        // Write failures have nowhere to be reported.
        let _ = self
            .console
            .make_writer_for(metadata)
            .write_all(console_line.as_bytes());

        if severity == Severity::Error
            && let Some(error_log) = &self.error_log
        {
            let _ = error_log
                .make_writer_for(metadata)
                .write_all(format!("{line}\n").as_bytes());
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    extra: String,
}

impl FieldCollector {
    fn finish(self) -> String {
        self.message + &self.extra
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.extra, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.extra, " {}={:?}", field.name(), value);
        }
    }
}

fn line_prefix() -> String {
    format!(
        "[{}] (UUID : {})",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        Uuid::new_v4()
    )
}

pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let error_log = match &config.error_file {
        Some(path) => Some(Mutex::new(open_error_log(path)?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(MirrorLayer::new(
            std::io::stdout,
            std::io::stdout().is_terminal(),
            error_log,
        ))
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

fn open_error_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open error log {}", path.display()))
}

/// In-memory writer for asserting on rendered log lines.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct CaptureWriter(std::sync::Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl CaptureWriter {
    pub(crate) fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().expect("capture lock").clone();
        String::from_utf8(bytes)
            .expect("utf8 output")
            .lines()
            .map(ToOwned::to_owned)
            .collect()
    }
}

/// Subscriber that renders plain console lines into `console` and error
/// lines into `error_log`.
#[cfg(test)]
pub(crate) fn capture_subscriber(
    console: &CaptureWriter,
    error_log: &CaptureWriter,
) -> impl Subscriber + Send + Sync + use<> {
    tracing_subscriber::registry().with(MirrorLayer::new(
        console.clone(),
        false,
        Some(error_log.clone()),
    ))
}

#[cfg(test)]
impl std::io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("capture lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl<'a> MakeWriter<'a> for CaptureWriter {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
