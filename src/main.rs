use log::{debug, warn};

use flowsh::shell::Shell;
use flowsh::utils::config::Config;
use flowsh::utils::log::init_logger;
use flowsh::utils::theme::load_theme;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::new();
    if let Err(e) = init_logger(&config) {
        eprintln!("{}: logging disabled: {}", config.name, e);
    }
    debug!("configuration loaded from {}", config.config_dir.display());
    if !matches!(config.theme.as_str(), "default" | "dark") {
        warn!("unknown theme {:?}, using default", config.theme);
    }
    let theme = load_theme(&config.theme);

    let mut shell = Shell::new(&config, theme)?;
    shell.run()
}
