mod cli;
mod config;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{info, warn};

use coffer_core::backup;
use coffer_core::error::{CofferError, Result};
use coffer_core::file::scan::PathScanner;
use coffer_core::restore;
use coffer_core::store::Store;

use cli::{Cli, Commands, StoreArgs};
use config::{clean_path, load_config_file, LocalConfig, PathsConfig, StoreConfig};

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = clean_path(&cli.config);

    match cli.command {
        Commands::Scan { out, paths } => {
            let scanner = build_scanner(&PathsConfig::default(), &paths)?;
            backup::write_manifest(Path::new(&out), &scanner)
        }

        Commands::Init { pass, force, store } => {
            let (original, mut cfg) = load_config(&config_path, &store);
            let bucket = make_store(&cfg.store, &store)?;
            if !bucket.is_clean() && !force {
                return Err(CofferError::Config(
                    "store is already initialized; cannot wipe without --force".into(),
                ));
            }
            info!("initializing the store for first use");
            cfg.store.keys = bucket.wipe(pass.as_bytes())?;
            save_if_changed(&original, &cfg, &config_path)
        }

        Commands::Backup { pass, store, paths } => {
            let (original, mut cfg) = load_config(&config_path, &store);
            let bucket = setup_store(&mut cfg.store, &store, pass.as_deref())?;
            save_if_changed(&original, &cfg, &config_path)?;

            let scanner = build_scanner(&cfg.paths, &paths)?;
            backup::scan_and_backup(&bucket, &scanner)
        }

        Commands::Restore {
            pass,
            dest,
            store,
            paths,
        } => {
            let (original, mut cfg) = load_config(&config_path, &store);
            let bucket = setup_store(&mut cfg.store, &store, pass.as_deref())?;
            save_if_changed(&original, &cfg, &config_path)?;

            let include: Vec<String> = paths
                .iter()
                .map(|p| clean_path(p).to_string_lossy().into_owned())
                .collect();
            restore::restore_to_path(&bucket, &clean_path(&dest), &include)
        }
    }
}

/// Load the config file, then apply any command line overrides.
fn load_config(path: &Path, args: &StoreArgs) -> (LocalConfig, LocalConfig) {
    let mut cfg = match load_config_file(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unable to load config file");
            LocalConfig::new()
        }
    };
    let original = cfg.clone();

    if let Some(region) = &args.s3_region {
        cfg.store.s3.region = region.clone();
    }
    if let Some(bucket) = &args.s3_bucket {
        cfg.store.s3.bucket = bucket.clone();
    }
    if let Some(key) = &args.s3_key {
        cfg.store.s3.access_key = key.clone();
    }
    if let Some(secret) = &args.s3_secret {
        cfg.store.s3.secret_key = secret.clone();
    }

    (original, cfg)
}

fn save_if_changed(original: &LocalConfig, cfg: &LocalConfig, path: &Path) -> Result<()> {
    if original != cfg {
        info!(path = %path.display(), "saving updated config file");
        cfg.write_to_file(path)?;
    }
    Ok(())
}

fn make_store(cfg: &StoreConfig, args: &StoreArgs) -> Result<Store> {
    match args.storage.as_str() {
        "s3" => Store::new_s3(&cfg.s3),
        "fs" => {
            let root = args.fs_root.as_deref().ok_or_else(|| {
                CofferError::Config("--fs-root is required with filesystem storage".into())
            })?;
            Ok(Store::new_fs(&clean_path(root)))
        }
        other => Err(CofferError::Config(format!(
            "invalid storage type '{other}'"
        ))),
    }
}

/// Connect to the store: derive fresh keys when a password was given, or
/// try the existing keys from the config.
fn setup_store(cfg: &mut StoreConfig, args: &StoreArgs, pass: Option<&str>) -> Result<Store> {
    let bucket = make_store(cfg, args)?;
    if let Some(pass) = pass {
        info!("attempting to access the store with the password provided");
        cfg.keys = bucket.unlock(pass.as_bytes())?;
    } else {
        info!("using the crypto keys from config to read the store");
        bucket.open(&cfg.keys)?;
    }
    Ok(bucket)
}

/// Build a scanner from the configured paths plus command line paths.
/// A leading ':' marks a path for exclusion.
fn build_scanner(cfg_paths: &PathsConfig, cmd_paths: &[String]) -> Result<PathScanner> {
    let mut includes: Vec<PathBuf> = cfg_paths.include.iter().map(|p| clean_path(p)).collect();
    let mut excludes: Vec<PathBuf> = cfg_paths.exclude.iter().map(|p| clean_path(p)).collect();
    for p in cmd_paths {
        match p.strip_prefix(':') {
            Some(rest) => excludes.push(clean_path(rest)),
            None => includes.push(clean_path(p)),
        }
    }

    let mut scanner = PathScanner::new();
    for p in &excludes {
        scanner = scanner.exclude_path(p);
    }
    for p in &includes {
        scanner = scanner.include_path(p)?;
    }
    Ok(scanner)
}
