//! Command line options for `isar-worker`.

use crate::logging;
use crate::serve::serve;
use anyhow::{Context, Result};
use clap::Parser;
use isar_worker::{StorageConfig, WorkerConfig};
use std::io;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(
    name = "isar-worker",
    about = "Runs an Isar storage engine module behind a JSON-lines message protocol.",
    version
)]
/// Reads one JSON message per line on stdin and writes one JSON response per
/// line on stdout
pub struct Opts {
    /// Keep database files in this directory
    #[clap(long, value_name = "DIR", conflicts_with_all = ["in_memory", "no_storage"])]
    pub storage_dir: Option<PathBuf>,

    /// Keep database files in memory; they are gone when the worker exits
    #[clap(long, conflicts_with = "no_storage")]
    pub in_memory: bool,

    /// Run without storage. Modules see `opfsAvailable: false`
    #[clap(long)]
    pub no_storage: bool,

    /// Directory that relative module paths are resolved against
    #[clap(long, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Load worker settings from a TOML file. Flags take precedence
    #[clap(long, short, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Opts {
    /// The worker configuration described by the config file and flags.
    pub fn worker_config(&self) -> Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => WorkerConfig::from_toml_file(path)
                .with_context(|| format!("unable to load {}", path.display()))?,
            None => WorkerConfig::default(),
        };

        if let Some(dir) = &self.storage_dir {
            config.storage = StorageConfig::Directory { path: dir.clone() };
        } else if self.in_memory {
            config.storage = StorageConfig::Memory;
        } else if self.no_storage {
            config.storage = StorageConfig::Disabled;
        }
        if let Some(dir) = &self.base_dir {
            config.base_dir = Some(dir.clone());
        }
        Ok(config)
    }

    /// Serve the protocol on stdin/stdout until stdin closes.
    pub fn execute(&self) -> Result<()> {
        let config = self.worker_config()?;
        tracing::debug!(?config, "starting worker");
        serve(config, io::stdin().lock(), io::stdout())
    }
}

/// Entry point of the `isar-worker` binary.
pub fn isar_worker_main() {
    logging::set_up_logging();

    if let Err(err) = Opts::parse().execute() {
        eprintln!("error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let opts = Opts::try_parse_from(["isar-worker"]).unwrap();
        assert_eq!(opts.worker_config().unwrap(), WorkerConfig::default());
    }

    #[test]
    fn test_flags() {
        let opts =
            Opts::try_parse_from(["isar-worker", "--storage-dir", "/data", "--base-dir", "/mods"])
                .unwrap();
        assert_eq!(
            opts.worker_config().unwrap(),
            WorkerConfig::default()
                .with_storage(StorageConfig::Directory {
                    path: PathBuf::from("/data")
                })
                .with_base_dir("/mods")
        );

        let opts = Opts::try_parse_from(["isar-worker", "--no-storage"]).unwrap();
        assert_eq!(
            opts.worker_config().unwrap().storage,
            StorageConfig::Disabled
        );
    }

    #[test]
    fn test_storage_flags_conflict() {
        assert!(Opts::try_parse_from(["isar-worker", "--in-memory", "--no-storage"]).is_err());
        assert!(Opts::try_parse_from(["isar-worker", "--storage-dir", "x", "--in-memory"]).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("worker.toml");
        std::fs::write(&file, "base-dir = \"/mods\"\n[storage]\nkind = \"disabled\"\n").unwrap();

        let args: Vec<std::ffi::OsString> = vec![
            "isar-worker".into(),
            "--in-memory".into(),
            "--config".into(),
            file.into_os_string(),
        ];
        let opts = Opts::try_parse_from(args).unwrap();
        let config = opts.worker_config().unwrap();
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.base_dir, Some(PathBuf::from("/mods")));
    }

    #[test]
    fn test_missing_config_file() {
        let opts = Opts::try_parse_from(["isar-worker", "-c", "/nonexistent/worker.toml"]).unwrap();
        assert!(opts.worker_config().is_err());
    }
}
