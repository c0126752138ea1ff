use crate::utils::config::Config;
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::process;

/// Sends log records to a per-day file under the configured log directory.
/// Children inherit nothing from the logger: the file is opened close-on-exec.
pub fn init_logger(config: &Config) -> io::Result<()> {
    let level = config.log_level();
    let file = open_log_file(&config.logger_dir, &config.name)?;

    let result = Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[PID:{}][{}] {} - {}",
                process::id(),
                record.level(),
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .filter(Some(&config.name), level)
        .filter(None, LevelFilter::Warn)
        .try_init();

    if let Err(e) = result {
        return Err(io::Error::new(io::ErrorKind::Other, e));
    }
    log::debug!("log level set to {}", level);
    Ok(())
}

fn open_log_file(dir: &Path, name: &str) -> io::Result<File> {
    fs::create_dir_all(dir)?;
    let date = Local::now().format("%Y-%m-%d");
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{}_{}.log", name, date)))
}
