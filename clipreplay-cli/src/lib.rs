//! Shared setup for the clipreplay command-line tools.

use std::path::Path;

use clipreplay_core::config::Config;
use clipreplay_core::errors::Result;

/// Install `env_logger`.  `RUST_LOG` wins over `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

/// Load the TOML config at `path`, or defaults when none was given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

/// Print `err` and exit with status 1.
pub fn exit_with(tool: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{tool}: {err}");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_defaults_without_path() {
        assert_eq!(load_config(None).unwrap(), Config::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[replay]\ninter_token_delay_ms = 5").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.replay.inter_token_delay_ms, 5);
    }
}
