//! Process-wide rolling file log for fleet binaries.
//!
//! Lines are metadata only (`event=... module=... status=...` plus ids and
//! counts). Driver names, plate numbers and free-text notes never reach the
//! log.
//!
//! # Invariants
//! - At most one logger per process; repeating the same setup is a no-op.
//! - Setup failures are returned, never panicked.

use crate::config::LoggingConfig;
use flexi_logger::{
    Cleanup, Criterion, FileSpec, LogSpecification, Logger, LoggerHandle, Naming, WriteMode,
};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const LOG_FILE_BASENAME: &str = "fleet";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_ROTATED_FILES: usize = 5;
const PANIC_MESSAGE_LIMIT: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    level: LevelFilter,
    dir: PathBuf,
    _handle: LoggerHandle,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoggingError {
    #[error("unsupported log level `{0}`; expected trace|debug|info|warn|error")]
    UnknownLevel(String),

    #[error("log directory must be an absolute path, got `{}`", .0.display())]
    RelativeDir(PathBuf),

    #[error("cannot create log directory `{}`: {reason}", .dir.display())]
    CreateDir { dir: PathBuf, reason: String },

    #[error("logging already runs at level `{level}` in `{}`", .dir.display())]
    AlreadyRunning { level: LevelFilter, dir: PathBuf },

    #[error("log backend failed to start: {0}")]
    Backend(String),
}

/// Starts the file logger, or confirms the running one has this setup.
pub fn init_logging(level: &str, log_dir: impl AsRef<Path>) -> Result<(), LoggingError> {
    let level = parse_level(level)?;
    let dir = log_dir.as_ref();
    if !dir.is_absolute() {
        return Err(LoggingError::RelativeDir(dir.to_path_buf()));
    }

    let active = ACTIVE.get_or_try_init(|| start(level, dir.to_path_buf()))?;
    if active.level != level || active.dir != dir {
        return Err(LoggingError::AlreadyRunning {
            level: active.level,
            dir: active.dir.clone(),
        });
    }
    Ok(())
}

/// Starts logging from the `[logging]` section.
///
/// A relative `dir` is taken from `base`. Returns `false` when no directory
/// is configured and logging stays off.
pub fn init_from_config(config: &LoggingConfig, base: &Path) -> Result<bool, LoggingError> {
    let Some(dir) = config.dir.as_deref() else {
        return Ok(false);
    };
    init_logging(&config.level, base.join(dir))?;
    Ok(true)
}

/// Level and directory of the running logger.
pub fn logging_status() -> Option<(LevelFilter, PathBuf)> {
    ACTIVE.get().map(|active| (active.level, active.dir.clone()))
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Parses a configured level; `off` is not accepted.
pub fn parse_level(value: &str) -> Result<LevelFilter, LoggingError> {
    let trimmed = value.trim();
    let normalized = if trimmed.eq_ignore_ascii_case("warning") {
        "warn"
    } else {
        trimmed
    };
    match LevelFilter::from_str(normalized) {
        Ok(LevelFilter::Off) | Err(_) => Err(LoggingError::UnknownLevel(trimmed.to_string())),
        Ok(level) => Ok(level),
    }
}

fn start(level: LevelFilter, dir: PathBuf) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(&dir).map_err(|err| LoggingError::CreateDir {
        dir: dir.clone(),
        reason: err.to_string(),
    })?;

    let handle = Logger::with(LogSpecification::builder().default(level).build())
        .log_to_file(
            FileSpec::default()
                .directory(dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_ROTATED_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    install_panic_hook();
    info!(
        "event=logging_init module=logging status=ok level={} version={} os={}",
        level,
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    );

    Ok(ActiveLogger {
        level,
        dir,
        _handle: handle,
    })
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let location = panic
            .location()
            .map_or_else(|| "unknown".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        let message = panic
            .payload()
            .downcast_ref::<&str>()
            .map(|text| (*text).to_string())
            .or_else(|| panic.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string payload".to_string());
        error!(
            "event=panic module=logging status=error location={} message={}",
            location,
            single_line(&message, PANIC_MESSAGE_LIMIT)
        );
        previous(panic);
    }));
}

fn single_line(value: &str, limit: usize) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    if flat.chars().count() <= limit {
        return flat;
    }
    let mut cut = flat.chars().take(limit).collect::<String>();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("INFO"), Ok(LevelFilter::Info));
        assert_eq!(parse_level(" warning "), Ok(LevelFilter::Warn));
        assert_eq!(
            parse_level("off"),
            Err(LoggingError::UnknownLevel("off".to_string()))
        );
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn relative_directory_is_rejected() {
        assert_eq!(
            init_logging("info", "logs/dev"),
            Err(LoggingError::RelativeDir(PathBuf::from("logs/dev")))
        );
    }

    #[test]
    fn missing_directory_keeps_logging_off() {
        let config = LoggingConfig {
            level: "info".to_string(),
            dir: None,
        };
        assert_eq!(init_from_config(&config, Path::new("/srv/fleet")), Ok(false));
    }

    #[test]
    fn single_line_flattens_and_truncates() {
        assert_eq!(single_line("AB\n123", 10), "AB 123");
        assert_eq!(single_line("plate\rA123BC77", 5), "plate...");
    }

    #[test]
    fn repeated_setup_is_idempotent_and_conflicts_are_rejected() {
        let base = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "info".to_string(),
            dir: Some(PathBuf::from("logs")),
        };
        assert_eq!(init_from_config(&config, base.path()), Ok(true));
        init_logging("info", base.path().join("logs")).unwrap();

        let level = init_logging("debug", base.path().join("logs")).unwrap_err();
        assert!(matches!(level, LoggingError::AlreadyRunning { .. }));
        let other = tempfile::tempdir().unwrap();
        let dir = init_logging("info", other.path()).unwrap_err();
        assert!(matches!(dir, LoggingError::AlreadyRunning { .. }));

        let (active_level, active_dir) = logging_status().unwrap();
        assert_eq!(active_level, LevelFilter::Info);
        assert_eq!(active_dir, base.path().join("logs"));
    }
}
