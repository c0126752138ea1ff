use dotenv::dotenv;
use log::LevelFilter;
use rustyline::EditMode;
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub theme: String,
    pub config_dir: PathBuf,
    pub history_file: PathBuf,
    pub editor_mode: String,
    pub logger_level: String,
    pub logger_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = Self::get_config_dir();
        Config {
            name: env!("CARGO_PKG_NAME").to_string(),
            theme: String::from("default"),
            history_file: config_dir.join(".flowsh_history"),
            editor_mode: String::from("emacs"),
            logger_level: String::from("warn"),
            logger_dir: config_dir.join("logs"),
            config_dir,
        }
    }
}

impl Config {
    fn get_config_dir() -> PathBuf {
        if let Ok(home) = env::var("HOME") {
            PathBuf::from(home).join(".config/flowsh")
        } else {
            PathBuf::from("tmp")
        }
    }

    pub fn new() -> Self {
        if cfg!(debug_assertions) {
            dotenv::from_filename(".env.development").ok();
        } else {
            dotenv().ok();
        }
        let config = Self::from_lookup(|key| env::var(key).ok());

        if let Some(parent) = config.history_file.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "{}: cannot create {}: {}",
                    config.name,
                    parent.display(),
                    e
                );
            }
        }
        config
    }

    /// Defaults overridden by whatever `lookup` finds for the `FLOWSH_*` keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();

        if let Some(theme) = lookup("FLOWSH_THEME") {
            config.theme = theme;
        }
        if let Some(editor) = lookup("FLOWSH_EDITOR") {
            config.editor_mode = editor;
        }
        if let Some(history) = lookup("FLOWSH_HISTORY") {
            config.history_file = PathBuf::from(shellexpand::tilde(&history).as_ref());
        }
        if let Some(level) = lookup("FLOWSH_LOG_LEVEL") {
            config.logger_level = level;
        }
        if let Some(dir) = lookup("FLOWSH_LOG_DIR") {
            config.logger_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
        }
        config
    }

    pub fn get_edit_mode(&self) -> EditMode {
        match self.editor_mode.to_lowercase().as_str() {
            "vi" => EditMode::Vi,
            _ => EditMode::Emacs,
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        match self.logger_level.to_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.name, "flowsh");
        assert_eq!(config.theme, "default");
        assert_eq!(config.get_edit_mode(), EditMode::Emacs);
        assert_eq!(config.log_level(), LevelFilter::Warn);
        assert!(config.history_file.ends_with(".flowsh_history"));
        assert!(config.logger_dir.ends_with("logs"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FLOWSH_THEME", "dark"),
            ("FLOWSH_EDITOR", "VI"),
            ("FLOWSH_HISTORY", "/tmp/flowsh/history"),
            ("FLOWSH_LOG_LEVEL", "Debug"),
            ("FLOWSH_LOG_DIR", "/tmp/flowsh/logs"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.theme, "dark");
        assert_eq!(config.get_edit_mode(), EditMode::Vi);
        assert_eq!(config.history_file, PathBuf::from("/tmp/flowsh/history"));
        assert_eq!(config.log_level(), LevelFilter::Debug);
        assert_eq!(config.logger_dir, PathBuf::from("/tmp/flowsh/logs"));
    }
}
