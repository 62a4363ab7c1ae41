// src/main.rs

use alpmkit::config::{DEFAULT_DBPATH, DEFAULT_GPGDIR, DEFAULT_ROOT};
use alpmkit::{Error, Handle, HandleOptions, Package, SigLevel, TransFlags, Transaction};
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "alpmkit")]
#[command(author, version, about = "Package transactions for Arch-style package databases", long_about = None)]
struct Cli {
    /// Install root directory
    #[arg(long, global = true, default_value = DEFAULT_ROOT)]
    root: PathBuf,

    /// Database directory (local store, sync databases, lock file)
    #[arg(long, global = true, default_value = DEFAULT_DBPATH)]
    dbpath: PathBuf,

    /// Keyring directory for signature checks
    #[arg(long, global = true, default_value = DEFAULT_GPGDIR)]
    gpgdir: PathBuf,

    /// Architecture packages must match (defaults to the host)
    #[arg(long, global = true)]
    arch: Option<String>,

    /// Package cache directory (repeatable)
    #[arg(long = "cachedir", global = true)]
    cache_dirs: Vec<PathBuf>,

    /// Default signature level (repeatable, e.g. package-optional)
    #[arg(long = "siglevel", global = true)]
    siglevels: Vec<String>,

    /// Transaction flag (repeatable, e.g. needed, cascade, recurse)
    #[arg(long = "flag", global = true)]
    flags: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed packages
    Query {
        /// Only list packages matching this pattern
        pattern: Option<String>,
    },
    /// Show details of an installed package
    Info {
        /// Package name
        name: String,
    },
    /// Search the sync databases
    Search {
        /// Regular expressions that must all match
        #[arg(required = true)]
        terms: Vec<String>,
        /// Only search this repository
        #[arg(long)]
        repo: Option<String>,
    },
    /// Install package files
    Install {
        /// Package files (.pkg.tar.zst, .pkg.tar.xz, .pkg.tar.gz)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Install packages from the sync databases
    Sync {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove installed packages
    Remove {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Compare two version strings
    Vercmp { a: String, b: String },
    /// Check the signature of a sync database
    CheckDb {
        /// Repository name
        repo: String,
    },
    /// Remove a stale database lock
    Unlock,
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Vercmp { a, b } => {
            let result = match alpmkit::vercmp(a, b) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
            println!("{}", result);
            return Ok(());
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "alpmkit", &mut io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let handle = open_handle(&cli)?;
    let flags = TransFlags::from_names(&cli.flags)?;

    match cli.command {
        Commands::Query { pattern } => {
            let local = handle.local_database();
            let packages = match &pattern {
                Some(pattern) => local.search(&[pattern])?,
                None => local.packages()?,
            };

            if packages.is_empty() {
                println!("No packages found.");
            } else {
                for pkg in &packages {
                    println!("{} {}", pkg.name(), pkg.version());
                }
                println!("\nTotal: {} package(s)", packages.len());
            }
        }
        Commands::Info { name } => {
            let pkg = handle
                .local_database()
                .lookup(&name)?
                .with_context(|| format!("package '{}' is not installed", name))?;
            print_info(&pkg);
        }
        Commands::Search { terms, repo } => {
            let mut found = 0;
            for db in handle.sync_databases() {
                if repo.as_deref().is_some_and(|r| r != db.name()) {
                    continue;
                }
                for pkg in db.search(terms.as_slice())? {
                    println!("{}/{} {}", db.name(), pkg.name(), pkg.version());
                    if let Some(desc) = pkg.description() {
                        println!("    {}", desc);
                    }
                    found += 1;
                }
            }
            if found == 0 {
                println!("No packages found.");
            }
        }
        Commands::Install { files } => {
            let packages = files
                .iter()
                .map(|path| handle.load_package_file(path, SigLevel::USE_DEFAULT, false))
                .collect::<alpmkit::Result<Vec<_>>>()?;
            run_transaction(&handle, flags, |trans| {
                for pkg in packages {
                    trans.stage_add(pkg)?;
                }
                Ok(())
            })?;
        }
        Commands::Sync { names } => {
            let mut packages = Vec::new();
            for name in &names {
                packages.push(find_sync_package(&handle, name)?);
            }
            run_transaction(&handle, flags, |trans| {
                for pkg in packages {
                    trans.stage_add(pkg)?;
                }
                Ok(())
            })?;
        }
        Commands::Remove { names } => {
            let local = handle.local_database();
            let mut packages = Vec::new();
            for name in &names {
                let pkg = local
                    .lookup(name)?
                    .with_context(|| format!("package '{}' is not installed", name))?;
                packages.push(pkg);
            }
            run_transaction(&handle, flags, |trans| {
                for pkg in packages {
                    trans.stage_remove(pkg)?;
                }
                Ok(())
            })?;
        }
        Commands::CheckDb { repo } => {
            let db = handle
                .sync_databases()
                .into_iter()
                .find(|db| db.name() == repo)
                .with_context(|| format!("repository '{}' is not configured", repo))?;
            if db.is_valid()? {
                println!("{}: ok", repo);
            } else {
                let reason = handle
                    .last_error()
                    .map(alpmkit::describe_error)
                    .unwrap_or("unknown error");
                anyhow::bail!("{}: {}", repo, reason);
            }
        }
        Commands::Unlock => {
            handle.unlock()?;
            println!("Removed {}", handle.lock_file().display());
        }
        Commands::Vercmp { .. } | Commands::Completions { .. } => {}
    }

    handle.close()?;
    Ok(())
}

fn open_handle(cli: &Cli) -> Result<Handle> {
    let mut options = HandleOptions::new(&cli.root, &cli.dbpath);
    options.gpgdir = cli.gpgdir.clone();
    if let Some(arch) = &cli.arch {
        options.arch = arch.clone();
    }
    if !cli.cache_dirs.is_empty() {
        options.cache_dirs = cli.cache_dirs.clone();
    }
    if !cli.siglevels.is_empty() {
        options.default_siglevel = SigLevel::from_names(&cli.siglevels)?;
    }

    let handle = Handle::with_options(options)
        .with_context(|| format!("failed to open database at {}", cli.dbpath.display()))?;

    for name in sync_database_names(&cli.dbpath.join("sync"))? {
        debug!("Registering sync database '{}'", name);
        handle.register_sync_database(&name, SigLevel::USE_DEFAULT)?;
    }
    Ok(handle)
}

/// Names of the `*.db` files in the sync directory, sorted
fn sync_database_names(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", dir.display())),
    };

    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "db") {
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn find_sync_package<'h>(handle: &'h Handle, name: &str) -> Result<Package<'h>> {
    for db in handle.sync_databases() {
        if let Some(pkg) = db.lookup(name)? {
            return Ok(pkg);
        }
    }
    anyhow::bail!("target not found: {}", name)
}

/// Begin a transaction, stage packages, then prepare, commit and end it
fn run_transaction<'h, F>(handle: &'h Handle, flags: TransFlags, stage: F) -> Result<()>
where
    F: FnOnce(&mut Transaction<'h>) -> alpmkit::Result<()>,
{
    let mut trans = handle.begin_transaction(flags)?;
    stage(&mut trans)?;

    if let Err(err) = trans.prepare() {
        if let Error::Prepare { problems, .. } = &err {
            for problem in problems {
                eprintln!("error: {}", problem);
            }
        }
        return finish(Err(err), trans.end());
    }

    for pkg in trans.removed_packages()? {
        info!("Removing {}", pkg);
    }
    for pkg in trans.added_packages()? {
        info!("Installing {}", pkg);
    }

    let committed = trans.commit();
    finish(committed, trans.end())?;

    println!("Transaction completed");
    Ok(())
}

/// Combine the outcome of a transaction step with ending the transaction
///
/// A failed step is the error reported; a failure to end after it is only
/// logged.
fn finish(outcome: alpmkit::Result<()>, ended: alpmkit::Result<()>) -> Result<()> {
    match (outcome, ended) {
        (Err(err), Err(end_err)) => {
            warn!("Failed to end transaction: {}", end_err);
            Err(err.into())
        }
        (Err(err), Ok(())) => Err(err.into()),
        (Ok(()), ended) => Ok(ended?),
    }
}

fn print_info(pkg: &Package<'_>) {
    let list = |items: Vec<String>| {
        if items.is_empty() {
            "None".to_string()
        } else {
            items.join("  ")
        }
    };

    println!("Name            : {}", pkg.name());
    println!("Version         : {}", pkg.version());
    println!("Description     : {}", pkg.description().unwrap_or("None"));
    println!("Architecture    : {}", pkg.arch().unwrap_or("None"));
    println!("URL             : {}", pkg.url().unwrap_or("None"));
    println!("Licenses        : {}", list(pkg.licenses().to_vec()));
    println!("Groups          : {}", list(pkg.groups().to_vec()));
    println!("Provides        : {}", list(pkg.provides().iter().map(|d| d.to_string()).collect()));
    println!("Depends On      : {}", list(pkg.depends().iter().map(|d| d.to_string()).collect()));
    println!("Conflicts With  : {}", list(pkg.conflicts().iter().map(|d| d.to_string()).collect()));
    println!("Installed Size  : {} KiB", pkg.installed_size() / 1024);
    println!("Packager        : {}", pkg.packager().unwrap_or("Unknown"));
    println!("Install Reason  : {}", pkg.reason().as_str());
    if let Some(date) = pkg.install_date().and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)) {
        println!("Install Date    : {}", date.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("Files           : {}", pkg.files().len());
}
