//! Process-wide logging bootstrap, following the teacher's own CLI tooling
//! convention (`env_logger::Builder::from_default_env().filter_level(..)
//! .format_timestamp_millis().init()`).

use log::LevelFilter;

pub fn init(level: LevelFilter) {
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}
