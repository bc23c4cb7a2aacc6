use crate::error::{CliError, Result};
use std::fs::File;
use std::path::PathBuf;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::DefaultFields, format::Format},
    prelude::*,
};

/// `-q` wins over any number of `-v`.
fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Plain-text layer behind `--log-file`. Engine evaluations may run on worker
/// threads, so records carry the thread id.
fn file_layer<S>(file: File) -> fmt::Layer<S, DefaultFields, Format, File> {
    fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_target(true)
}

pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<PathBuf>) -> Result<()> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact();

    let file_layer = log_file
        .map(|path| File::create(&path).map(file_layer))
        .transpose()?;

    tracing_subscriber::registry()
        .with(level_filter(verbosity, quiet))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tracing::{info, info_span, trace};

    #[test]
    fn quiet_overrides_verbosity() {
        assert_eq!(level_filter(0, false), LevelFilter::WARN);
        assert_eq!(level_filter(1, false), LevelFilter::INFO);
        assert_eq!(level_filter(2, false), LevelFilter::DEBUG);
        assert_eq!(level_filter(9, false), LevelFilter::TRACE);
        assert_eq!(level_filter(9, true), LevelFilter::ERROR);
    }

    #[test]
    #[serial]
    fn log_file_records_step_spans_and_engine_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let subscriber = tracing_subscriber::registry()
            .with(LevelFilter::INFO)
            .with(file_layer(File::create(&path).unwrap()));

        tracing::subscriber::with_default(subscriber, || {
            let span = info_span!("simulation_step", step = 3);
            let _guard = span.enter();
            info!(energy = -1.5, "Step complete.");
            trace!("filtered out");
        });

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("simulation_step{step=3}"));
        assert!(content.contains("energy=-1.5"));
        assert!(content.contains("ThreadId"));
        assert!(!content.contains("filtered out"));
    }

    #[test]
    #[serial]
    fn unwritable_log_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = setup_logging(0, false, Some(dir.path().to_path_buf()));
        assert!(matches!(result, Err(CliError::Io(_))));
    }

    #[test]
    #[serial]
    fn installing_a_second_global_logger_fails() {
        let _ = setup_logging(1, false, None);
        let again = setup_logging(1, false, None);
        assert!(matches!(again, Err(CliError::Other(_))));
    }
}
