// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

//! Per-build logger.
//!
//! A build never touches the process-wide maximum level. Each build owns a `BuildLog` holding a
//! sink and a level filter, and every pipeline step receives it explicitly. Records that pass
//! the filter are handed to the sink directly, so two builds with different levels can run in
//! the same process.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{Level, LevelFilter, Log, Metadata, Record};

const LOG_TARGET: &str = "uki_builder";

/// Forwards records to whatever logger is installed for the `log` facade.
struct GlobalSink;

impl Log for GlobalSink {
    fn enabled(&self, metadata: &Metadata) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        log::logger().log(record)
    }

    fn flush(&self) {
        log::logger().flush()
    }
}

#[derive(Clone)]
pub struct BuildLog {
    sink: Arc<dyn Log>,
    level: LevelFilter,
}

impl BuildLog {
    pub fn new(sink: Arc<dyn Log>, level: LevelFilter) -> Self {
        BuildLog { sink, level }
    }

    /// Log through the globally installed logger, e.g. `env_logger`.
    pub fn global(level: LevelFilter) -> Self {
        Self::new(Arc::new(GlobalSink), level)
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    pub fn log(&self, level: Level, args: fmt::Arguments) {
        if !self.enabled(level) {
            return;
        }
        self.sink.log(
            &Record::builder()
                .args(args)
                .level(level)
                .target(LOG_TARGET)
                .module_path_static(Some(module_path!()))
                .build(),
        );
    }

    pub fn error(&self, args: fmt::Arguments) {
        self.log(Level::Error, args)
    }

    pub fn warn(&self, args: fmt::Arguments) {
        self.log(Level::Warn, args)
    }

    pub fn info(&self, args: fmt::Arguments) {
        self.log(Level::Info, args)
    }

    pub fn debug(&self, args: fmt::Arguments) {
        self.log(Level::Debug, args)
    }
}

impl fmt::Debug for BuildLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildLog")
            .field("level", &self.level)
            .finish()
    }
}

/// Map a textual log level onto a filter. Unknown or empty values select `Info`.
pub fn parse_log_level(level: &str) -> LevelFilter {
    match LevelFilter::from_str(level.trim()) {
        Ok(lvl) => lvl,
        Err(_) => LevelFilter::Info,
    }
}
