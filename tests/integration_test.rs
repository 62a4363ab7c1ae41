// tests/integration_test.rs

//! Integration tests for alpmkit
//!
//! These tests build package files and sync databases on the fly and run
//! whole transactions against a temporary root.

use alpmkit::{
    Error, ErrorCode, Handle, HandleOptions, InstallReason, LogLevel, PrepareProblem, SigLevel, TransFlags,
    TransactionState,
};
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

#[derive(Default)]
struct PkgDef<'s> {
    name: &'s str,
    version: &'s str,
    desc: &'s str,
    depends: &'s [&'s str],
    provides: &'s [&'s str],
    backup: &'s [&'s str],
    files: &'s [(&'s str, &'s str)],
}

fn append(builder: &mut tar::Builder<GzEncoder<fs::File>>, path: &str, content: &[u8], mode: u32) {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    builder.append_data(&mut header, path, content).unwrap();
}

/// Write `<name>-<version>-any.pkg.tar.gz` into `dir`
fn build_package(dir: &Path, def: &PkgDef<'_>) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{}-{}-any.pkg.tar.gz", def.name, def.version));

    let mut pkginfo = format!(
        "pkgname = {}\npkgver = {}\npkgdesc = {}\narch = any\nsize = 1024\n",
        def.name, def.version, def.desc
    );
    for dep in def.depends {
        pkginfo.push_str(&format!("depend = {}\n", dep));
    }
    for provide in def.provides {
        pkginfo.push_str(&format!("provides = {}\n", provide));
    }
    for backup in def.backup {
        pkginfo.push_str(&format!("backup = {}\n", backup));
    }

    let file = fs::File::create(&path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    append(&mut builder, ".PKGINFO", pkginfo.as_bytes(), 0o644);
    for (file_path, content) in def.files {
        append(&mut builder, file_path, content.as_bytes(), 0o755);
    }
    builder.into_inner().unwrap().finish().unwrap();
    path
}

/// Write `<dbpath>/sync/<repo>.db` describing the given package files
fn build_sync_db(dbpath: &Path, repo: &str, packages: &[(&PkgDef<'_>, &PathBuf)]) {
    let sync_dir = dbpath.join("sync");
    fs::create_dir_all(&sync_dir).unwrap();

    let file = fs::File::create(sync_dir.join(format!("{}.db", repo))).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (def, pkg_path) in packages {
        let sha256 = format!("{:x}", Sha256::digest(fs::read(pkg_path).unwrap()));
        let mut desc = format!(
            "%FILENAME%\n{}\n\n%NAME%\n{}\n\n%VERSION%\n{}\n\n%DESC%\n{}\n\n%ARCH%\nany\n\n%SHA256SUM%\n{}\n",
            pkg_path.file_name().unwrap().to_string_lossy(),
            def.name,
            def.version,
            def.desc,
            sha256
        );
        if !def.depends.is_empty() {
            desc.push_str(&format!("\n%DEPENDS%\n{}\n", def.depends.join("\n")));
        }
        if !def.provides.is_empty() {
            desc.push_str(&format!("\n%PROVIDES%\n{}\n", def.provides.join("\n")));
        }
        append(
            &mut builder,
            &format!("{}-{}/desc", def.name, def.version),
            desc.as_bytes(),
            0o644,
        );
    }
    builder.into_inner().unwrap().finish().unwrap();
}

struct Fixture {
    temp_dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("root")).unwrap();
        Self { temp_dir }
    }

    fn root(&self) -> PathBuf {
        self.temp_dir.path().join("root")
    }

    fn dbpath(&self) -> PathBuf {
        self.temp_dir.path().join("db")
    }

    fn cache(&self) -> PathBuf {
        self.temp_dir.path().join("cache")
    }

    fn packages(&self) -> PathBuf {
        self.temp_dir.path().join("packages")
    }

    fn handle(&self) -> Handle {
        let mut options = HandleOptions::new(self.root(), self.dbpath());
        options.gpgdir = self.temp_dir.path().join("keys");
        options.cache_dirs = vec![self.cache()];
        options.arch = "x86_64".to_string();
        Handle::with_options(options).unwrap()
    }
}

/// Install package files in one transaction
fn install_files<P: AsRef<Path>>(handle: &Handle, flags: TransFlags, files: &[P]) -> alpmkit::Result<()> {
    let mut trans = handle.begin_transaction(flags)?;
    for file in files {
        trans.stage_add(handle.load_package_file(file.as_ref(), SigLevel::USE_DEFAULT, false)?)?;
    }
    trans.prepare()?;
    trans.commit()?;
    trans.end()
}

/// Remove installed packages in one transaction, returning what was removed
fn remove_names(handle: &Handle, flags: TransFlags, names: &[&str]) -> alpmkit::Result<Vec<String>> {
    let local = handle.local_database();
    let mut trans = handle.begin_transaction(flags)?;
    for name in names {
        let pkg = local.lookup(name)?.expect("package is installed");
        trans.stage_remove(pkg)?;
    }
    trans.prepare()?;
    let removed = trans.removed_packages()?.map(|p| p.name().to_string()).collect();
    trans.commit()?;
    trans.end()?;
    Ok(removed)
}

fn installed_names(handle: &Handle) -> Vec<String> {
    handle
        .local_database()
        .packages()
        .unwrap()
        .iter()
        .map(|p| p.name().to_string())
        .collect()
}

#[test]
fn test_install_and_remove_package_file() {
    let fixture = Fixture::new();
    let pkg_path = build_package(
        &fixture.packages(),
        &PkgDef {
            name: "foo",
            version: "1.0-1",
            desc: "The foo tool",
            files: &[("usr/bin/foo", "#!/bin/sh\necho foo\n"), ("usr/share/foo/README", "foo\n")],
            ..PkgDef::default()
        },
    );
    let handle = fixture.handle();

    install_files(&handle, TransFlags::empty(), &[&pkg_path]).unwrap();
    assert!(!handle.is_transaction_open());
    assert!(!handle.lock_file().exists());
    assert_eq!(
        fs::read_to_string(fixture.root().join("usr/bin/foo")).unwrap(),
        "#!/bin/sh\necho foo\n"
    );

    let foo = handle.local_database().lookup("foo").unwrap().unwrap();
    assert_eq!(foo.version(), "1.0-1");
    assert_eq!(foo.description(), Some("The foo tool"));
    assert_eq!(foo.reason(), InstallReason::Explicit);
    assert!(foo.install_date().is_some());
    assert_eq!(foo.files().len(), 2);
    assert!(foo.files().iter().all(|f| f.sha256.is_some()));
    drop(foo);

    let removed = remove_names(&handle, TransFlags::empty(), &["foo"]).unwrap();
    assert_eq!(removed, vec!["foo"]);
    assert!(!fixture.root().join("usr/bin/foo").exists());
    assert!(!fixture.root().join("usr").exists());

    assert!(handle.local_database().lookup("foo").unwrap().is_none());
    assert_eq!(handle.last_error(), Some(ErrorCode::PkgNotFound));
    handle.close().unwrap();
}

#[test]
fn test_sync_install_uses_cache_and_checksum() {
    let fixture = Fixture::new();
    let def = PkgDef {
        name: "bar",
        version: "2.0-1",
        desc: "The bar library",
        files: &[("usr/lib/libbar.so", "ELF")],
        ..PkgDef::default()
    };
    let pkg_path = build_package(&fixture.cache(), &def);
    build_sync_db(&fixture.dbpath(), "core", &[(&def, &pkg_path)]);

    let handle = fixture.handle();
    let core = handle.register_sync_database("core", SigLevel::USE_DEFAULT).unwrap();
    assert!(core.is_valid().unwrap());

    let bar = core.lookup("bar").unwrap().unwrap();
    assert!(bar.database().is_some_and(|db| db.name() == "core"));

    let mut trans = handle.begin_transaction(TransFlags::empty()).unwrap();
    trans.stage_add(bar).unwrap();
    trans.prepare().unwrap();
    trans.commit().unwrap();
    assert_eq!(trans.state(), TransactionState::Committed);
    trans.end().unwrap();

    assert!(fixture.root().join("usr/lib/libbar.so").exists());
    assert_eq!(installed_names(&handle), vec!["bar"]);
}

#[test]
fn test_sync_install_rejects_corrupted_cache_file() {
    let fixture = Fixture::new();
    let def = PkgDef {
        name: "bar",
        version: "2.0-1",
        files: &[("usr/lib/libbar.so", "ELF")],
        ..PkgDef::default()
    };
    let pkg_path = build_package(&fixture.cache(), &def);
    build_sync_db(&fixture.dbpath(), "core", &[(&def, &pkg_path)]);
    fs::write(&pkg_path, b"tampered").unwrap();

    let handle = fixture.handle();
    let core = handle.register_sync_database("core", SigLevel::USE_DEFAULT).unwrap();

    let mut trans = handle.begin_transaction(TransFlags::empty()).unwrap();
    trans.stage_add(core.lookup("bar").unwrap().unwrap()).unwrap();
    trans.prepare().unwrap();

    let err = trans.commit().unwrap_err();
    assert_eq!(err.code(), ErrorCode::PkgInvalidChecksum);
    assert_eq!(trans.state(), TransactionState::Interrupted);
    assert!(trans.prepare().is_err());
    trans.end().unwrap();
    assert!(installed_names(&handle).is_empty());
}

#[test]
fn test_search_requires_every_term() {
    let fixture = Fixture::new();
    let foobar = PkgDef {
        name: "foobar",
        version: "1.0-1",
        desc: "Combined tool",
        ..PkgDef::default()
    };
    let bar = PkgDef {
        name: "bar",
        version: "1.0-1",
        desc: "Plain BAR",
        ..PkgDef::default()
    };
    let foobar_path = build_package(&fixture.cache(), &foobar);
    let bar_path = build_package(&fixture.cache(), &bar);
    build_sync_db(&fixture.dbpath(), "extra", &[(&foobar, &foobar_path), (&bar, &bar_path)]);

    let handle = fixture.handle();
    let extra = handle.register_sync_database("extra", SigLevel::USE_DEFAULT).unwrap();

    let names = |terms: &[&str]| -> Vec<String> {
        extra
            .search(terms)
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    };
    assert_eq!(names(&["bar"]), vec!["bar", "foobar"]);
    assert_eq!(names(&["foo", "bar"]), vec!["foobar"]);
    assert_eq!(names(&["^bar$"]), vec!["bar"]);
    assert_eq!(names(&["plain"]), vec!["bar"]);
    assert!(names(&["baz"]).is_empty());

    let err = extra.search(&["("]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidRegex);
    assert_eq!(handle.last_error(), Some(ErrorCode::InvalidRegex));
}

#[test]
fn test_compare_packages_across_databases() {
    let fixture = Fixture::new();
    let old = PkgDef {
        name: "foo",
        version: "1.0-1",
        ..PkgDef::default()
    };
    let new = PkgDef {
        name: "foo",
        version: "1.0.1-1",
        ..PkgDef::default()
    };
    let old_path = build_package(&fixture.cache(), &old);
    let new_path = build_package(&fixture.cache(), &new);
    build_sync_db(&fixture.dbpath(), "core", &[(&old, &old_path)]);
    build_sync_db(&fixture.dbpath(), "testing", &[(&new, &new_path)]);

    let handle = fixture.handle();
    let core = handle.register_sync_database("core", SigLevel::USE_DEFAULT).unwrap();
    let testing = handle.register_sync_database("testing", SigLevel::USE_DEFAULT).unwrap();

    let a = core.lookup("foo").unwrap().unwrap();
    let b = testing.lookup("foo").unwrap().unwrap();
    assert_eq!(a.compare(&b), Ordering::Less);
    assert_eq!(b.compare(&a), Ordering::Greater);
    assert_eq!(a.compare(&a), Ordering::Equal);

    let file = handle.load_package_file(&new_path, SigLevel::USE_DEFAULT, false).unwrap();
    assert_eq!(file.compare(&b), Ordering::Equal);
}

#[test]
fn test_single_transaction_per_handle() {
    let fixture = Fixture::new();
    let handle = fixture.handle();

    let mut trans = handle.begin_transaction(TransFlags::empty()).unwrap();
    assert!(handle.lock_file().exists());

    let err = handle.begin_transaction(TransFlags::empty()).unwrap_err();
    assert!(matches!(err, Error::AlreadyOpen));
    assert_eq!(handle.last_error(), Some(ErrorCode::TransNotNull));

    let err = trans.commit().unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    trans.end().unwrap();
    assert!(!handle.lock_file().exists());
    assert!(trans.end().is_err());

    let mut again = handle.begin_transaction(TransFlags::NO_LOCK).unwrap();
    assert!(!handle.lock_file().exists());
    again.end().unwrap();
}

#[test]
fn test_unregistered_database_fails_fast() {
    let fixture = Fixture::new();
    let handle = fixture.handle();
    let core = handle.register_sync_database("core", SigLevel::USE_DEFAULT).unwrap();
    let copy = core.clone();

    core.unregister().unwrap();
    assert!(!copy.is_registered());
    assert!(handle.sync_databases().is_empty());

    let err = copy.packages().unwrap_err();
    assert_eq!(err.code(), ErrorCode::DbNotFound);
    assert_eq!(handle.last_error(), Some(ErrorCode::DbNotFound));
    assert!(copy.lookup("foo").is_err());
    assert!(copy.servers().is_err());

    // The name can be registered again
    handle.register_sync_database("core", SigLevel::USE_DEFAULT).unwrap();
}

#[test]
fn test_packages_of_unregistered_database_are_rejected() {
    let fixture = Fixture::new();
    let def = PkgDef {
        name: "bar",
        version: "2.0-1",
        files: &[("usr/lib/libbar.so", "ELF")],
        ..PkgDef::default()
    };
    let pkg_path = build_package(&fixture.cache(), &def);
    build_sync_db(&fixture.dbpath(), "core", &[(&def, &pkg_path)]);

    let handle = fixture.handle();
    let core = handle.register_sync_database("core", SigLevel::USE_DEFAULT).unwrap();
    let bar = core.lookup("bar").unwrap().unwrap();
    let staged = core.lookup("bar").unwrap().unwrap();

    // Unregistered after staging: caught by prepare
    let mut trans = handle.begin_transaction(TransFlags::empty()).unwrap();
    trans.stage_add(staged).unwrap();
    core.unregister().unwrap();

    let err = trans.prepare().unwrap_err();
    assert_eq!(err.code(), ErrorCode::DbNotFound);
    assert_eq!(trans.state(), TransactionState::Open);

    // Unregistered before staging: caught by stage_add
    let err = trans.stage_add(bar).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DbNotFound);
    assert_eq!(handle.last_error(), Some(ErrorCode::DbNotFound));
    trans.end().unwrap();

    assert!(!fixture.root().join("usr/lib/libbar.so").exists());
    assert!(installed_names(&handle).is_empty());
}

#[test]
fn test_database_validity_follows_siglevel() {
    let fixture = Fixture::new();
    let handle = fixture.handle();

    let core = handle.register_sync_database("core", SigLevel::USE_DEFAULT).unwrap();
    assert!(!core.is_valid().unwrap());
    assert_eq!(handle.last_error(), Some(ErrorCode::DbNotFound));

    let def = PkgDef {
        name: "foo",
        version: "1.0-1",
        ..PkgDef::default()
    };
    let pkg_path = build_package(&fixture.cache(), &def);
    build_sync_db(&fixture.dbpath(), "core", &[(&def, &pkg_path)]);
    build_sync_db(&fixture.dbpath(), "signed", &[(&def, &pkg_path)]);

    assert!(core.is_valid().unwrap());

    let signed = handle.register_sync_database("signed", SigLevel::DATABASE).unwrap();
    assert!(!signed.is_valid().unwrap());
    assert_eq!(handle.last_error(), Some(ErrorCode::SigMissing));

    let err = signed.packages().unwrap_err();
    assert_eq!(err.code(), ErrorCode::SigMissing);

    // A signature no key in the keyring can verify
    build_sync_db(&fixture.dbpath(), "forged", &[(&def, &pkg_path)]);
    fs::write(fixture.dbpath().join("sync/forged.db.sig"), b"not a signature").unwrap();
    let forged = handle.register_sync_database("forged", SigLevel::DATABASE).unwrap();
    assert!(!forged.is_valid().unwrap());
    assert_eq!(handle.last_error(), Some(ErrorCode::DbInvalidSig));
    assert_eq!(forged.packages().unwrap_err().code(), ErrorCode::DbInvalidSig);

    assert!(handle.local_database().is_valid().unwrap());
}

#[test]
fn test_required_package_signature() {
    let fixture = Fixture::new();
    let pkg_path = build_package(
        &fixture.packages(),
        &PkgDef {
            name: "foo",
            version: "1.0-1",
            ..PkgDef::default()
        },
    );
    let handle = fixture.handle();

    let err = handle.load_package_file(&pkg_path, SigLevel::PACKAGE, false).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SigMissing);
    assert!(handle.load_package_file(&pkg_path, SigLevel::empty(), false).is_ok());
}

#[test]
fn test_prepare_reports_missing_dependency() {
    let fixture = Fixture::new();
    let app = build_package(
        &fixture.packages(),
        &PkgDef {
            name: "app",
            version: "1.0-1",
            depends: &["libfoo>=1.0"],
            files: &[("usr/bin/app", "app")],
            ..PkgDef::default()
        },
    );
    let lib = build_package(
        &fixture.packages(),
        &PkgDef {
            name: "libfoo",
            version: "1.2-1",
            files: &[("usr/lib/libfoo.so", "lib")],
            ..PkgDef::default()
        },
    );
    let handle = fixture.handle();

    let mut trans = handle.begin_transaction(TransFlags::empty()).unwrap();
    trans
        .stage_add(handle.load_package_file(&app, SigLevel::USE_DEFAULT, false).unwrap())
        .unwrap();

    match trans.prepare().unwrap_err() {
        Error::Prepare { code, problems } => {
            assert_eq!(code, ErrorCode::UnsatisfiedDeps);
            assert_eq!(
                problems,
                vec![PrepareProblem::MissingDependency {
                    target: "app".to_string(),
                    depend: "libfoo>=1.0".to_string(),
                }]
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(trans.state(), TransactionState::Open);

    trans
        .stage_add(handle.load_package_file(&lib, SigLevel::USE_DEFAULT, false).unwrap())
        .unwrap();
    trans.prepare().unwrap();
    trans.commit().unwrap();
    trans.end().unwrap();

    assert_eq!(installed_names(&handle), vec!["app", "libfoo"]);
}

#[test]
fn test_cascade_and_recursive_removal() {
    let fixture = Fixture::new();
    let app = build_package(
        &fixture.packages(),
        &PkgDef {
            name: "app",
            version: "1.0-1",
            depends: &["libfoo"],
            files: &[("usr/bin/app", "app")],
            ..PkgDef::default()
        },
    );
    let lib = build_package(
        &fixture.packages(),
        &PkgDef {
            name: "libfoo",
            version: "1.0-1",
            files: &[("usr/lib/libfoo.so", "lib")],
            ..PkgDef::default()
        },
    );
    let handle = fixture.handle();

    install_files(&handle, TransFlags::ALL_DEPS, &[&lib]).unwrap();
    install_files(&handle, TransFlags::empty(), &[&app]).unwrap();
    assert_eq!(
        handle.local_database().lookup("libfoo").unwrap().unwrap().reason(),
        InstallReason::Depend
    );

    let err = remove_names(&handle, TransFlags::empty(), &["libfoo"]).unwrap_err();
    match err {
        Error::Prepare { problems, .. } => assert_eq!(
            problems,
            vec![PrepareProblem::BreaksDependency {
                removed: "libfoo".to_string(),
                dependent: "app".to_string(),
                depend: "libfoo".to_string(),
            }]
        ),
        other => panic!("unexpected error: {:?}", other),
    }
    // The failed transaction was dropped and released its slot
    assert!(!handle.is_transaction_open());

    let removed = remove_names(&handle, TransFlags::CASCADE, &["libfoo"]).unwrap();
    assert_eq!(removed, vec!["libfoo", "app"]);
    assert!(installed_names(&handle).is_empty());

    install_files(&handle, TransFlags::ALL_DEPS, &[&lib]).unwrap();
    install_files(&handle, TransFlags::empty(), &[&app]).unwrap();
    let removed = remove_names(&handle, TransFlags::RECURSE, &["app"]).unwrap();
    assert_eq!(removed, vec!["app", "libfoo"]);
    assert!(!fixture.root().join("usr/lib/libfoo.so").exists());
}

#[test]
fn test_upgrade_preserves_modified_backup_files() {
    let fixture = Fixture::new();
    let v1 = build_package(
        &fixture.packages(),
        &PkgDef {
            name: "foo",
            version: "1.0-1",
            backup: &["etc/foo.conf"],
            files: &[("etc/foo.conf", "setting=1\n"), ("usr/share/foo/old", "old")],
            ..PkgDef::default()
        },
    );
    let v2 = build_package(
        &fixture.packages(),
        &PkgDef {
            name: "foo",
            version: "2.0-1",
            backup: &["etc/foo.conf"],
            files: &[("etc/foo.conf", "setting=2\n"), ("usr/share/foo/new", "new")],
            ..PkgDef::default()
        },
    );
    let handle = fixture.handle();
    let conf = fixture.root().join("etc/foo.conf");

    install_files(&handle, TransFlags::ALL_DEPS, &[&v1]).unwrap();
    fs::write(&conf, "setting=local\n").unwrap();

    install_files(&handle, TransFlags::empty(), &[&v2]).unwrap();
    assert_eq!(fs::read_to_string(&conf).unwrap(), "setting=local\n");
    assert_eq!(
        fs::read_to_string(fixture.root().join("etc/foo.conf.pacnew")).unwrap(),
        "setting=2\n"
    );
    assert!(!fixture.root().join("usr/share/foo/old").exists());
    assert!(fixture.root().join("usr/share/foo/new").exists());

    let foo = handle.local_database().lookup("foo").unwrap().unwrap();
    assert_eq!(foo.version(), "2.0-1");
    // An upgrade keeps the install reason
    assert_eq!(foo.reason(), InstallReason::Depend);
    drop(foo);

    remove_names(&handle, TransFlags::empty(), &["foo"]).unwrap();
    assert!(!conf.exists());
    assert_eq!(
        fs::read_to_string(fixture.root().join("etc/foo.conf.pacsave")).unwrap(),
        "setting=local\n"
    );
}

#[test]
fn test_needed_skips_installed_version() {
    let fixture = Fixture::new();
    let pkg = build_package(
        &fixture.packages(),
        &PkgDef {
            name: "foo",
            version: "1.0-1",
            files: &[("usr/bin/foo", "foo")],
            ..PkgDef::default()
        },
    );
    let handle = fixture.handle();
    install_files(&handle, TransFlags::empty(), &[&pkg]).unwrap();

    let mut trans = handle.begin_transaction(TransFlags::NEEDED).unwrap();
    trans
        .stage_add(handle.load_package_file(&pkg, SigLevel::USE_DEFAULT, false).unwrap())
        .unwrap();
    trans.prepare().unwrap();
    assert_eq!(trans.added_packages().unwrap().count(), 0);
    trans.end().unwrap();
}

#[test]
fn test_file_conflicts_and_force() {
    let fixture = Fixture::new();
    let pkg = build_package(
        &fixture.packages(),
        &PkgDef {
            name: "foo",
            version: "1.0-1",
            files: &[("usr/bin/foo", "packaged")],
            ..PkgDef::default()
        },
    );
    let handle = fixture.handle();
    fs::create_dir_all(fixture.root().join("usr/bin")).unwrap();
    fs::write(fixture.root().join("usr/bin/foo"), "unowned").unwrap();

    let mut trans = handle.begin_transaction(TransFlags::empty()).unwrap();
    trans
        .stage_add(handle.load_package_file(&pkg, SigLevel::USE_DEFAULT, false).unwrap())
        .unwrap();
    trans.prepare().unwrap();
    let err = trans.commit().unwrap_err();
    assert_eq!(err.code(), ErrorCode::FileConflicts);
    assert_eq!(trans.state(), TransactionState::Interrupted);
    trans.end().unwrap();
    assert!(installed_names(&handle).is_empty());

    install_files(&handle, TransFlags::FORCE, &[&pkg]).unwrap();
    assert_eq!(
        fs::read_to_string(fixture.root().join("usr/bin/foo")).unwrap(),
        "packaged"
    );
}

#[test]
fn test_log_sink_receives_engine_messages() {
    let fixture = Fixture::new();
    let pkg = build_package(
        &fixture.packages(),
        &PkgDef {
            name: "foo",
            version: "1.0-1",
            depends: &["missing"],
            ..PkgDef::default()
        },
    );

    let mut handle = fixture.handle();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink_seen = Rc::clone(&seen);
    handle.set_log_sink(move |level, msg| sink_seen.borrow_mut().push((level, msg.to_string())));

    assert!(install_files(&handle, TransFlags::empty(), &[&pkg]).is_err());

    let seen = seen.borrow();
    assert!(seen.iter().any(|(level, msg)| *level == LogLevel::Debug && msg == "preparing transaction"));
    assert!(seen.iter().any(|(level, _)| *level == LogLevel::Error));
}
