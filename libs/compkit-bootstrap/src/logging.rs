use crate::config::{LoggingConfig, Section};
use std::io::IsTerminal;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, util::SubscriberInitExt, Layer};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

// Keep a guard for non-blocking console to avoid being dropped.
static CONSOLE_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

const DEFAULT_SECTION: &str = "default";
const DEFAULT_MAX_SIZE_MB: u64 = 100;

fn parse_tracing_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

/// Returns true if target == prefix or target starts with "prefix::"
fn matches_target_prefix(target: &str, prefix: &str) -> bool {
    target == prefix
        || (target.starts_with(prefix) && target[prefix.len()..].starts_with("::"))
}

// ================= rotating writer for files =================

type SharedRotate = Arc<Mutex<FileRotate<AppendTimestamp>>>;

#[derive(Clone)]
struct RotWriterHandle(SharedRotate);

impl Write for RotWriterHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.0.lock() {
            Ok(mut file) => file.write(buf),
            // A panicked writer loses the line rather than the process.
            Err(_) => Ok(buf.len()),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self.0.lock() {
            Ok(mut file) => file.flush(),
            Err(_) => Ok(()),
        }
    }
}

/// A writer handle that may be None (drops writes)
struct RoutedWriterHandle(Option<RotWriterHandle>);

impl Write for RoutedWriterHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.0 {
            Some(w) => w.write(buf),
            None => Ok(buf.len()),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.0 {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// Routes log records to different files by target prefix, e.g. "compkit::runtime".
#[derive(Clone, Default)]
struct FileSinks {
    default: Option<SharedRotate>,
    by_prefix: Vec<(String, SharedRotate)>,
}

impl FileSinks {
    fn resolve_for(&self, target: &str) -> Option<RotWriterHandle> {
        // Longest prefix wins so "compkit::runtime" beats "compkit".
        self.by_prefix
            .iter()
            .filter(|(prefix, _)| matches_target_prefix(target, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, w)| RotWriterHandle(w.clone()))
            .or_else(|| self.default.clone().map(RotWriterHandle))
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

impl<'a> fmt::MakeWriter<'a> for FileSinks {
    type Writer = RoutedWriterHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RoutedWriterHandle(self.default.clone().map(RotWriterHandle))
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        RoutedWriterHandle(self.resolve_for(meta.target()))
    }
}

fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn open_rotating_file(section: &Section, base_dir: &Path) -> std::io::Result<SharedRotate> {
    let log_path = resolve_log_path(&section.file, base_dir);
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Prefer a file count when provided, else age-based retention.
    let limit = match section.max_backups {
        Some(n) => FileLimit::MaxFiles(n),
        None => FileLimit::Age(chrono::Duration::days(
            i64::from(section.max_age_days.unwrap_or(1)),
        )),
    };
    let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) as usize * 1024 * 1024;

    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    );
    Ok(Arc::new(Mutex::new(rot)))
}

fn build_file_sinks(cfg: &LoggingConfig, base_dir: &Path) -> FileSinks {
    let mut sinks = FileSinks::default();
    for (name, section) in cfg {
        if section.file.trim().is_empty() {
            continue;
        }
        let writer = match open_rotating_file(section, base_dir) {
            Ok(w) => w,
            Err(e) => {
                eprintln!(
                    "Failed to init log file for subsystem '{name}': {} ({e})",
                    section.file
                );
                continue;
            }
        };
        if name == DEFAULT_SECTION {
            sinks.default = Some(writer);
        } else {
            sinks.by_prefix.push((name.clone(), writer));
        }
    }
    sinks
}

/// Per-sink level rules; console reads `console_level`, file reads `file_level`.
fn build_targets(cfg: &LoggingConfig, level_of: fn(&Section) -> &str, fallback: LevelFilter) -> Targets {
    let default_level = cfg
        .get(DEFAULT_SECTION)
        .map(|s| {
            parse_tracing_level(level_of(s))
                .map(LevelFilter::from_level)
                .unwrap_or(LevelFilter::OFF)
        })
        .unwrap_or(fallback);

    cfg.iter()
        .filter(|(name, _)| name.as_str() != DEFAULT_SECTION)
        .fold(Targets::new().with_default(default_level), |targets, (name, section)| {
            let level = parse_tracing_level(level_of(section))
                .map(LevelFilter::from_level)
                .unwrap_or(LevelFilter::OFF);
            targets.with_target(name.clone(), level)
        })
}

/// Install the global subscriber: console (stderr, human readable) plus optional JSON files.
///
/// `RUST_LOG`, when set, caps both sinks. Calling this twice is harmless; the
/// second call leaves the first subscriber in place.
pub fn init_logging(cfg: &LoggingConfig, base_dir: &Path) {
    use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

    // Bridge `log` → `tracing` *before* installing the subscriber
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    let env: Option<EnvFilter> = EnvFilter::try_from_default_env().ok();

    if cfg.is_empty() {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339());
        let _ = Registry::default().with(env).with(fmt_layer).try_init();
        return;
    }

    let sinks = build_file_sinks(cfg, base_dir);
    let console_targets = build_targets(cfg, |s| s.console_level.as_str(), LevelFilter::INFO);
    let file_targets = build_targets(
        cfg,
        |s| {
            if s.file_level.is_empty() {
                s.console_level.as_str()
            } else {
                s.file_level.as_str()
            }
        },
        LevelFilter::OFF,
    );

    let (nb_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console_layer = fmt::layer()
        .with_writer(nb_stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets);

    let file_layer = (!sinks.is_empty()).then(|| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_level(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(sinks)
            .with_filter(file_targets)
    });

    let _ = Registry::default()
        .with(env)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}
