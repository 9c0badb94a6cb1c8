// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Logging (C11): `log` facade macros throughout the codebase, `log4rs` as
//! the concrete backend, configured once at startup.

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config as Log4rsConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::Log;
use crate::error::{Error, ErrorKind};

const LOG_FILE_SIZE: u64 = 16 * 1024 * 1024;
const ROLLER_PATTERN: &str = ".{}.gz";
const ROLLER_COUNT: u32 = 10;

const STDOUT_NAME: &str = "stdout";
const ROLLER_NAME: &str = "roller";

fn level_filter(level: &str) -> LevelFilter {
    match level {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

pub fn init(log_conf: &Log) -> Result<(), Error> {
    let stdout = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d} {h({l})} - {m}{n}")))
        .build();

    let log_path = log_conf
        .file
        .to_str()
        .ok_or_else(|| Error::new(ErrorKind::ConfigError, "log.file is not valid UTF-8"))?;
    let roller_pattern = format!("{log_path}{ROLLER_PATTERN}");
    let roller = FixedWindowRoller::builder()
        .build(&roller_pattern, ROLLER_COUNT)
        .map_err(|err| Error::new(ErrorKind::ConfigError, &err.to_string()))?;
    let policy = Box::new(CompoundPolicy::new(
        Box::new(SizeTrigger::new(LOG_FILE_SIZE)),
        Box::new(roller),
    ));
    let rolling_file = RollingFileAppender::builder()
        .build(&log_conf.file, policy)
        .map_err(|err| Error::new(ErrorKind::ConfigError, &err.to_string()))?;

    let level = level_filter(&log_conf.level);
    let config = Log4rsConfig::builder()
        .appender(Appender::builder().build(STDOUT_NAME, Box::new(stdout)))
        .appender(Appender::builder().build(ROLLER_NAME, Box::new(rolling_file)))
        .build(Root::builder().appenders([ROLLER_NAME, STDOUT_NAME]).build(level))
        .map_err(|err| Error::new(ErrorKind::ConfigError, &err.to_string()))?;

    log4rs::init_config(config).map_err(|err| Error::new(ErrorKind::ConfigError, &err.to_string()))?;
    Ok(())
}
