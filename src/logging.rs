//! Logging setup with a runtime-adjustable level

use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
    #[error("Failed to reload log level: {0}")]
    Reload(#[from] reload::Error),
}

/// Handle for changing the process-wide log level
#[derive(Clone)]
pub struct LogControl {
    handle: Option<reload::Handle<LevelFilter, Registry>>,
    level: Arc<RwLock<LevelFilter>>,
}

impl LogControl {
    /// A control that is not wired to any subscriber; it only tracks the level
    pub fn detached(level: LevelFilter) -> Self {
        Self {
            handle: None,
            level: Arc::new(RwLock::new(level)),
        }
    }

    pub fn level(&self) -> LevelFilter {
        *self.level.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_level(&self, level: LevelFilter) -> Result<(), LogError> {
        if let Some(handle) = &self.handle {
            handle.reload(level)?;
        }
        *self.level.write().unwrap_or_else(PoisonError::into_inner) = level;
        Ok(())
    }
}

impl Default for LogControl {
    fn default() -> Self {
        Self::detached(LevelFilter::INFO)
    }
}

/// Install the global subscriber.
///
/// Logs go to stderr so they never mix with command output.
pub fn init(level: LevelFilter) -> Result<LogControl, LogError> {
    let (filter, handle) = reload::Layer::new(level);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()?;

    Ok(LogControl {
        handle: Some(handle),
        level: Arc::new(RwLock::new(level)),
    })
}

/// Map a level name to a filter. Unknown names mean INFO.
pub fn parse_log_level(s: &str) -> LevelFilter {
    match s.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => LevelFilter::DEBUG,
        "INFO" => LevelFilter::INFO,
        "WARN" | "WARNING" => LevelFilter::WARN,
        "ERROR" | "FATAL" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// Level name in the form the engine expects
pub fn level_name(level: LevelFilter) -> &'static str {
    if level == LevelFilter::OFF {
        "OFF"
    } else if level == LevelFilter::ERROR {
        "ERROR"
    } else if level == LevelFilter::WARN {
        "WARN"
    } else if level == LevelFilter::INFO {
        "INFO"
    } else {
        "DEBUG"
    }
}
