//! Common utility functions for the simulation binary.
//!
//! This module contains shared utilities for the CLI including:
//! - Logger initialization
//! - Output directory validation
//! - Naming of the files written for each run

use std::error::Error;
use std::path::{Path, PathBuf};

/// Initialize the logger with the specified configuration.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or logger initialization fails.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Validate the output directory, creating it if it does not exist.
///
/// # Errors
/// Returns an error if the path exists but is not a directory, or if creation fails.
pub fn validate_output_path(output: &Path) -> Result<(), Box<dyn Error>> {
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    } else if !output.is_dir() {
        return Err(format!("Output path '{}' is not a directory.", output.display()).into());
    }
    Ok(())
}

/// Path of an output file inside `output`, named `{stem}.{extension}`.
pub fn output_file(output: &Path, stem: &str, extension: &str) -> PathBuf {
    output.join(stem).with_extension(extension)
}

/// Check that a configuration path carries an extension the loader understands.
pub fn validate_config_extension(path: &Path) -> Result<(), Box<dyn Error>> {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .as_deref()
    {
        Some("json") | Some("yaml") | Some("yml") | Some("toml") => Ok(()),
        _ => Err(format!(
            "Configuration file '{}' must end in .json, .yaml, .yml or .toml.",
            path.display()
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_validate_output_path_creates_directory() {
        let dir = tempdir().unwrap();
        let new_dir = dir.path().join("new_output_dir");

        assert!(!new_dir.exists());
        validate_output_path(&new_dir).unwrap();
        assert!(new_dir.exists());
    }

    #[test]
    fn test_validate_output_path_existing() {
        let dir = tempdir().unwrap();
        assert!(validate_output_path(dir.path()).is_ok());
    }

    #[test]
    fn test_validate_output_path_rejects_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("results.csv");
        File::create(&file_path).unwrap();
        assert!(validate_output_path(&file_path).is_err());
    }

    #[test]
    fn test_output_file() {
        let path = output_file(Path::new("out"), "localization", "csv");
        assert_eq!(path, PathBuf::from("out/localization.csv"));
    }

    #[test]
    fn test_validate_config_extension() {
        assert!(validate_config_extension(Path::new("run.toml")).is_ok());
        assert!(validate_config_extension(Path::new("run.YML")).is_ok());
        assert!(validate_config_extension(Path::new("run.ini")).is_err());
        assert!(validate_config_extension(Path::new("run")).is_err());
    }
}
