//< Helpers that are useful for tests.
use std::collections::BTreeSet;

use crate::{config::Config, module::ModuleDescriptor};

/// configure a global logger at level==DEBUG.
pub fn init_logging() {
    let log_level = log::LevelFilter::Debug;
    // other tests may have installed the logger already.
    let _ = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{:5}] {} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                if log_level == log::LevelFilter::Trace {
                    record.target()
                } else {
                    ""
                },
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply();
}

/// a descriptor built from raw bytes under the default configuration.
pub fn module(name: &str, bytes: &[u8], relocs: &[usize]) -> ModuleDescriptor {
    ModuleDescriptor::from_bytes(name, bytes, relocs.iter().cloned(), &Config::default())
}

pub fn hints(offsets: &[usize]) -> BTreeSet<usize> {
    offsets.iter().cloned().collect()
}
