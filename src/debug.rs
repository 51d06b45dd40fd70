//! Per-component logging handle.
//!
//! Every component receives its own `DebugModule` at construction instead of
//! consulting process-wide state. The handle carries a target name and a
//! verbosity that can be changed at runtime from any thread; messages go out
//! through the `log` facade so the embedding application picks the backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{Level, LevelFilter};

/// Named logging handle with its own runtime-settable verbosity.
///
/// Cloning shares the verbosity, so a control thread holding a clone can
/// raise or lower the level of a running stream.
#[derive(Debug, Clone)]
pub struct DebugModule {
    name: Arc<str>,
    level: Arc<AtomicUsize>,
}

impl DebugModule {
    /// Create a module logging at `level` and below.
    pub fn new(name: &str, level: LevelFilter) -> Self {
        Self {
            name: Arc::from(name),
            level: Arc::new(AtomicUsize::new(level as usize)),
        }
    }

    /// Create a module that discards everything until its level is raised.
    pub fn silent(name: &str) -> Self {
        Self::new(name, LevelFilter::Off)
    }

    /// Derive a module for a sub-component.
    /// The child starts at the parent's current level but is tuned independently.
    pub fn child(&self, suffix: &str) -> Self {
        Self::new(&format!("{}::{}", self.name, suffix), self.verbose())
    }

    /// Target name used for every record
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Change the verbosity (safe while other threads are logging)
    pub fn set_verbose(&self, level: LevelFilter) {
        self.level.store(level as usize, Ordering::Relaxed);
    }

    /// Current verbosity
    pub fn verbose(&self) -> LevelFilter {
        match self.level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Whether a record at `level` would be emitted
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.verbose() && level <= log::max_level()
    }

    /// Emit a record. Prefer the `dbg_*` macros, which skip formatting when disabled.
    pub fn log(&self, level: Level, args: std::fmt::Arguments<'_>) {
        if self.enabled(level) {
            log::log!(target: &*self.name, level, "{}", args);
        }
    }
}

impl Default for DebugModule {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), LevelFilter::Warn)
    }
}

#[macro_export]
macro_rules! dbg_error {
    ($module:expr, $($arg:tt)+) => {
        if $module.enabled($crate::__log::Level::Error) {
            $module.log($crate::__log::Level::Error, format_args!($($arg)+));
        }
    };
}

#[macro_export]
macro_rules! dbg_warn {
    ($module:expr, $($arg:tt)+) => {
        if $module.enabled($crate::__log::Level::Warn) {
            $module.log($crate::__log::Level::Warn, format_args!($($arg)+));
        }
    };
}

#[macro_export]
macro_rules! dbg_info {
    ($module:expr, $($arg:tt)+) => {
        if $module.enabled($crate::__log::Level::Info) {
            $module.log($crate::__log::Level::Info, format_args!($($arg)+));
        }
    };
}

#[macro_export]
macro_rules! dbg_debug {
    ($module:expr, $($arg:tt)+) => {
        if $module.enabled($crate::__log::Level::Debug) {
            $module.log($crate::__log::Level::Debug, format_args!($($arg)+));
        }
    };
}

#[macro_export]
macro_rules! dbg_trace {
    ($module:expr, $($arg:tt)+) => {
        if $module.enabled($crate::__log::Level::Trace) {
            $module.log($crate::__log::Level::Trace, format_args!($($arg)+));
        }
    };
}
