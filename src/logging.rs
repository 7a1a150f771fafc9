use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber. RUST_LOG takes precedence over `logging.level`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log filter: {}", config.level))?;

    match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

            eprintln!("\x1b[36m📝 Logging to:\x1b[0m {}", path.display());
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
        }
    }

    Ok(())
}

/// Run `f` with a temporary stderr subscriber, for messages emitted before the
/// logging config is known (config lookup and validation)
pub fn with_startup_logging<T>(f: impl FnOnce() -> T) -> T {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    scoped(filter, std::io::stderr, f)
}

fn scoped<W, T>(filter: EnvFilter, writer: W, f: impl FnOnce() -> T) -> T
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn test_config_warnings_reach_startup_subscriber() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("reelcount.yaml");
        std::fs::write(&path, "leaderboard:\n  limit: 0\n").unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let config = scoped(
            EnvFilter::new("info"),
            move || writer.clone(),
            || Config::load_from_file(&path),
        )
        .unwrap();

        assert_eq!(config.leaderboard.limit, 10);
        assert!(captured.text().contains("leaderboard.limit must be positive"));
    }
}
