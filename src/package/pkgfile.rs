// src/package/pkgfile.rs

//! Package file reader
//!
//! Reads .pkg.tar.zst, .pkg.tar.xz, .pkg.tar.gz and plain .pkg.tar archives,
//! extracting metadata from .PKGINFO and, on request, the file list and the
//! file contents.

use super::{Depend, PackageFile, PackageRecord};
use crate::error::{Error, ErrorCode, Result};
use flate2::read::GzDecoder;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::debug;
use xz2::read::XzDecoder;

/// Archive members that carry metadata rather than installable files
const METADATA_ENTRIES: &[&str] = &[".PKGINFO", ".MTREE", ".BUILDINFO", ".INSTALL", ".CHANGELOG"];

/// Package compression format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompressionFormat {
    Zstd,
    Xz,
    Gzip,
    None,
}

/// Parsed .PKGINFO metadata
#[derive(Default)]
struct PkgInfo {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    url: Option<String>,
    architecture: Option<String>,
    build_date: Option<i64>,
    packager: Option<String>,
    size: Option<u64>,
    licenses: Vec<String>,
    groups: Vec<String>,
    dependencies: Vec<String>,
    optional_deps: Vec<String>,
    conflicts: Vec<String>,
    provides: Vec<String>,
    replaces: Vec<String>,
    backup: Vec<String>,
}

/// A file extracted from a package with its content
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    /// Path relative to the install root, without leading slash
    pub path: String,
    pub content: Vec<u8>,
    pub mode: u32,
    pub sha256: String,
    /// Target of a symbolic link entry
    pub link_target: Option<PathBuf>,
}

fn load_error(path: &Path, code: ErrorCode, message: impl Into<String>) -> Error {
    Error::Load {
        code,
        path: path.display().to_string(),
        message: message.into(),
    }
}

/// Detect compression format from file extension, falling back to magic bytes
fn detect_compression(path: &Path) -> Result<CompressionFormat> {
    let name = path.to_string_lossy();
    if name.ends_with(".tar.zst") {
        return Ok(CompressionFormat::Zstd);
    } else if name.ends_with(".tar.xz") {
        return Ok(CompressionFormat::Xz);
    } else if name.ends_with(".tar.gz") {
        return Ok(CompressionFormat::Gzip);
    } else if name.ends_with(".tar") {
        return Ok(CompressionFormat::None);
    }

    let mut file = File::open(path).map_err(|e| load_error(path, ErrorCode::PkgOpen, e.to_string()))?;
    let mut magic = [0u8; 6];
    file.read_exact(&mut magic)
        .map_err(|e| load_error(path, ErrorCode::PkgInvalid, e.to_string()))?;

    if magic[0..4] == [0x28, 0xB5, 0x2F, 0xFD] {
        Ok(CompressionFormat::Zstd)
    } else if magic == [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00] {
        Ok(CompressionFormat::Xz)
    } else if magic[0..2] == [0x1F, 0x8B] {
        Ok(CompressionFormat::Gzip)
    } else {
        Err(load_error(
            path,
            ErrorCode::PkgInvalid,
            "unsupported package format, expected .pkg.tar.zst, .pkg.tar.xz or .pkg.tar.gz",
        ))
    }
}

/// Open and decompress an archive (packages and sync databases alike)
pub(crate) fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
    let compression = detect_compression(path)?;
    let file = File::open(path).map_err(|e| load_error(path, ErrorCode::PkgOpen, e.to_string()))?;

    let reader: Box<dyn Read> = match compression {
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(file).map_err(|e| {
                load_error(path, ErrorCode::Archive, format!("failed to create zstd decoder: {}", e))
            })?;
            Box::new(decoder)
        }
        CompressionFormat::Xz => Box::new(XzDecoder::new(file)),
        CompressionFormat::Gzip => Box::new(GzDecoder::new(file)),
        CompressionFormat::None => Box::new(file),
    };

    Ok(Archive::new(reader))
}

/// Parse .PKGINFO file content
fn parse_pkginfo(content: &str) -> PkgInfo {
    let mut info = PkgInfo::default();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim();

            match key {
                "pkgname" => info.name = Some(value.to_string()),
                "pkgver" => info.version = Some(value.to_string()),
                "pkgdesc" => info.description = Some(value.to_string()),
                "url" => info.url = Some(value.to_string()),
                "builddate" => info.build_date = value.parse().ok(),
                "packager" => info.packager = Some(value.to_string()),
                "size" => info.size = value.parse().ok(),
                "arch" => info.architecture = Some(value.to_string()),
                "license" => info.licenses.push(value.to_string()),
                "group" => info.groups.push(value.to_string()),
                "depend" => info.dependencies.push(value.to_string()),
                "optdepend" => info.optional_deps.push(value.to_string()),
                "conflict" => info.conflicts.push(value.to_string()),
                "provides" => info.provides.push(value.to_string()),
                "replaces" => info.replaces.push(value.to_string()),
                "backup" => info.backup.push(value.to_string()),
                _ => {}
            }
        }
    }

    info
}

fn entry_path<R: Read>(path: &Path, entry: &tar::Entry<'_, R>) -> Result<String> {
    let entry_path = entry
        .path()
        .map_err(|e| load_error(path, ErrorCode::Archive, format!("invalid entry path: {}", e)))?;
    Ok(entry_path
        .to_string_lossy()
        .trim_start_matches("./")
        .to_string())
}

/// Compute the md5 and sha256 hex digests of a file
fn file_checksums(path: &Path) -> Result<(String, String, u64)> {
    let mut file = File::open(path).map_err(|e| load_error(path, ErrorCode::PkgOpen, e.to_string()))?;
    let mut md5 = Md5::new();
    let mut sha256 = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(load_error(path, ErrorCode::PkgOpen, e.to_string())),
        };
        md5.update(&buf[..n]);
        sha256.update(&buf[..n]);
        size += n as u64;
    }

    Ok((
        format!("{:x}", md5.finalize()),
        format!("{:x}", sha256.finalize()),
        size,
    ))
}

/// Hex sha256 of a byte slice
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Read a package file into a record
///
/// With `full` set, the archive is walked completely and the file list is
/// filled in; otherwise reading stops after .PKGINFO.
pub fn read_package(path: &Path, full: bool) -> Result<PackageRecord> {
    debug!("Reading package file: {} (full: {})", path.display(), full);

    let mut archive = open_archive(path)?;
    let mut pkginfo = None;
    let mut files = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| load_error(path, ErrorCode::PkgInvalid, format!("failed to read archive: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| load_error(path, ErrorCode::PkgInvalid, format!("failed to read entry: {}", e)))?;
        let name = entry_path(path, &entry)?;

        if name == ".PKGINFO" {
            let mut content = String::new();
            entry.read_to_string(&mut content).map_err(|e| {
                load_error(path, ErrorCode::PkgInvalid, format!("failed to read .PKGINFO: {}", e))
            })?;
            pkginfo = Some(parse_pkginfo(&content));
            if !full {
                break;
            }
            continue;
        }

        if !full || METADATA_ENTRIES.contains(&name.as_str()) || entry.header().entry_type().is_dir() {
            continue;
        }

        let size = entry.header().size().unwrap_or(0);
        let mode = entry.header().mode().unwrap_or(0o644);
        let link_target = if entry.header().entry_type() == EntryType::Symlink {
            entry
                .link_name()
                .map_err(|e| load_error(path, ErrorCode::Archive, e.to_string()))?
                .map(|t| t.to_string_lossy().to_string())
        } else {
            None
        };
        files.push(PackageFile {
            path: name,
            size,
            mode,
            sha256: None,
            link_target,
        });
    }

    let info = pkginfo.ok_or_else(|| load_error(path, ErrorCode::PkgInvalid, "no .PKGINFO file found in package"))?;

    let name = info
        .name
        .ok_or_else(|| load_error(path, ErrorCode::PkgInvalid, "package name not found in .PKGINFO"))?;
    let version = info
        .version
        .ok_or_else(|| load_error(path, ErrorCode::PkgInvalid, "package version not found in .PKGINFO"))?;

    let (md5sum, sha256sum, size) = file_checksums(path)?;

    debug!(
        "Parsed package: {} version {} ({} files, {} dependencies)",
        name,
        version,
        files.len(),
        info.dependencies.len()
    );

    Ok(PackageRecord {
        filename: path.file_name().map(|f| f.to_string_lossy().to_string()),
        name,
        version,
        description: info.description,
        url: info.url,
        packager: info.packager,
        arch: info.architecture,
        md5sum: Some(md5sum),
        sha256sum: Some(sha256sum),
        size,
        installed_size: info.size.unwrap_or(0),
        build_date: info.build_date,
        licenses: info.licenses,
        groups: info.groups,
        depends: info.dependencies.iter().map(|d| Depend::parse(d)).collect(),
        optdepends: info.optional_deps.iter().map(|d| Depend::parse(d)).collect(),
        conflicts: info.conflicts.iter().map(|d| Depend::parse(d)).collect(),
        provides: info.provides.iter().map(|d| Depend::parse(d)).collect(),
        replaces: info.replaces.iter().map(|d| Depend::parse(d)).collect(),
        backup: info.backup,
        files,
        ..PackageRecord::default()
    })
}

/// Extract all installable file contents from a package
pub fn extract_files(path: &Path) -> Result<Vec<ExtractedFile>> {
    debug!("Extracting file contents from package: {}", path.display());

    let mut archive = open_archive(path)?;
    let mut extracted = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| load_error(path, ErrorCode::PkgInvalid, format!("failed to read archive: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| load_error(path, ErrorCode::PkgInvalid, format!("failed to read entry: {}", e)))?;
        let name = entry_path(path, &entry)?;

        if METADATA_ENTRIES.contains(&name.as_str()) {
            continue;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            continue;
        }

        let mode = entry.header().mode().unwrap_or(0o644);

        if entry_type == EntryType::Symlink {
            let target = entry
                .link_name()
                .map_err(|e| load_error(path, ErrorCode::Archive, e.to_string()))?
                .map(|t| t.into_owned());
            extracted.push(ExtractedFile {
                path: name,
                content: Vec::new(),
                mode,
                sha256: String::new(),
                link_target: target,
            });
            continue;
        }

        let mut content = Vec::new();
        entry.read_to_end(&mut content).map_err(|e| {
            load_error(path, ErrorCode::PkgInvalid, format!("failed to read file content: {}", e))
        })?;

        extracted.push(ExtractedFile {
            sha256: sha256_hex(&content),
            path: name,
            content,
            mode,
            link_target: None,
        });
    }

    debug!("Extracted {} files from package", extracted.len());
    Ok(extracted)
}
