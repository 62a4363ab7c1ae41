// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("alpmkit")
        .version(env!("CARGO_PKG_VERSION"))
        .author("alpmkit Contributors")
        .about("Package transactions for Arch-style package databases")
        .arg(
            Arg::new("root")
                .long("root")
                .global(true)
                .default_value("/")
                .help("Install root directory"),
        )
        .arg(
            Arg::new("dbpath")
                .long("dbpath")
                .global(true)
                .default_value("/var/lib/pacman")
                .help("Database directory (local store, sync databases, lock file)"),
        )
        .arg(
            Arg::new("gpgdir")
                .long("gpgdir")
                .global(true)
                .default_value("/etc/pacman.d/gnupg")
                .help("Keyring directory for signature checks"),
        )
        .arg(
            Arg::new("arch")
                .long("arch")
                .global(true)
                .help("Architecture packages must match (defaults to the host)"),
        )
        .arg(
            Arg::new("cachedir")
                .long("cachedir")
                .global(true)
                .action(ArgAction::Append)
                .help("Package cache directory (repeatable)"),
        )
        .arg(
            Arg::new("siglevel")
                .long("siglevel")
                .global(true)
                .action(ArgAction::Append)
                .help("Default signature level (repeatable, e.g. package-optional)"),
        )
        .arg(
            Arg::new("flag")
                .long("flag")
                .global(true)
                .action(ArgAction::Append)
                .help("Transaction flag (repeatable, e.g. needed, cascade, recurse)"),
        )
        .subcommand(
            Command::new("query")
                .about("List installed packages")
                .arg(Arg::new("pattern").help("Only list packages matching this pattern")),
        )
        .subcommand(
            Command::new("info")
                .about("Show details of an installed package")
                .arg(Arg::new("name").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("search")
                .about("Search the sync databases")
                .arg(
                    Arg::new("terms")
                        .required(true)
                        .num_args(1..)
                        .help("Regular expressions that must all match"),
                )
                .arg(Arg::new("repo").long("repo").help("Only search this repository")),
        )
        .subcommand(
            Command::new("install")
                .about("Install package files")
                .arg(Arg::new("files").required(true).num_args(1..).help("Package files")),
        )
        .subcommand(
            Command::new("sync")
                .about("Install packages from the sync databases")
                .arg(Arg::new("names").required(true).num_args(1..).help("Package names")),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove installed packages")
                .arg(Arg::new("names").required(true).num_args(1..).help("Package names")),
        )
        .subcommand(
            Command::new("vercmp")
                .about("Compare two version strings")
                .arg(Arg::new("a").required(true))
                .arg(Arg::new("b").required(true)),
        )
        .subcommand(
            Command::new("check-db")
                .about("Check the signature of a sync database")
                .arg(Arg::new("repo").required(true).help("Repository name")),
        )
        .subcommand(Command::new("unlock").about("Remove a stale database lock"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true).help("Target shell")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("alpmkit.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
