// src/signature.rs

//! Detached OpenPGP signature checks
//!
//! A file `foo` is signed by `foo.sig`. The signature is accepted when any
//! signing-capable key of any certificate in the keyring directory verifies
//! it. Trust levels are not evaluated: a key present in the keyring is a
//! trusted key.

use crate::error::ErrorCode;
use crate::flags::SigRequirement;
use openpgp::cert::CertParser;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::{Cert, Packet, PacketPile};
use sequoia_openpgp as openpgp;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File names inside the keyring directory that hold certificates
const KEYRING_EXTENSIONS: &[&str] = &["asc", "gpg", "pgp"];

/// Why a signature check failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SigFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl SigFailure {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Path of the detached signature belonging to `path`
pub(crate) fn signature_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".sig");
    PathBuf::from(name)
}

/// Certificates loaded from a keyring directory
pub(crate) struct Keyring {
    certs: Vec<Cert>,
    policy: StandardPolicy<'static>,
}

impl Keyring {
    /// Load every certificate found in `dir`
    ///
    /// A missing directory is an empty keyring. Files that fail to parse are
    /// skipped with a warning.
    pub(crate) fn load(dir: &Path) -> Self {
        let mut certs = Vec::new();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Keyring directory {} not readable: {}", dir.display(), e);
                return Self::from_certs(certs);
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_keyring = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| KEYRING_EXTENSIONS.contains(&ext));
            if !is_keyring || !path.is_file() {
                continue;
            }

            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Failed to read keyring file {}: {}", path.display(), e);
                    continue;
                }
            };

            match CertParser::from_bytes(&data) {
                Ok(parser) => {
                    for cert in parser {
                        match cert {
                            Ok(cert) => certs.push(cert),
                            Err(e) => warn!("Skipping bad certificate in {}: {}", path.display(), e),
                        }
                    }
                }
                Err(e) => warn!("Failed to parse keyring file {}: {}", path.display(), e),
            }
        }

        debug!("Loaded {} certificate(s) from {}", certs.len(), dir.display());
        Self::from_certs(certs)
    }

    fn from_certs(certs: Vec<Cert>) -> Self {
        Self {
            certs,
            policy: StandardPolicy::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Verify a detached signature over `data`
    pub(crate) fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), SigFailure> {
        let pile = PacketPile::from_bytes(signature).map_err(|e| {
            SigFailure::new(ErrorCode::SigInvalid, format!("failed to parse signature: {}", e))
        })?;

        for packet in pile.descendants() {
            if let Packet::Signature(sig) = packet {
                for cert in &self.certs {
                    for key in cert.keys().with_policy(&self.policy, None) {
                        if key.for_signing() && sig.verify_message(key.key(), data).is_ok() {
                            debug!("Signature verified by {}", cert.fingerprint());
                            return Ok(());
                        }
                    }
                }
            }
        }

        Err(SigFailure::new(
            ErrorCode::SigInvalid,
            "no valid signature from a key in the keyring",
        ))
    }
}

/// Check the detached signature of `path` against `requirement`
///
/// Absent signatures pass unless they are required. A present signature is
/// always verified, even when it is only optional.
pub(crate) fn check_file(
    path: &Path,
    requirement: SigRequirement,
    keyring_dir: &Path,
) -> Result<(), SigFailure> {
    if requirement == SigRequirement::Never {
        return Ok(());
    }

    let sig_path = signature_path(path);
    let signature = match fs::read(&sig_path) {
        Ok(signature) => signature,
        Err(_) if requirement == SigRequirement::Optional => {
            debug!("No signature for {}, optional", path.display());
            return Ok(());
        }
        Err(_) => {
            return Err(SigFailure::new(
                ErrorCode::SigMissing,
                format!("missing signature {}", sig_path.display()),
            ));
        }
    };

    let data = fs::read(path).map_err(|e| {
        SigFailure::new(
            ErrorCode::NotAFile,
            format!("failed to read {}: {}", path.display(), e),
        )
    })?;

    let keyring = Keyring::load(keyring_dir);
    if keyring.is_empty() {
        return Err(SigFailure::new(
            ErrorCode::SigInvalid,
            format!("no keys found in {}", keyring_dir.display()),
        ));
    }

    keyring.verify(&data, &signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpgp::cert::CertBuilder;
    use openpgp::serialize::Serialize;
    use openpgp::serialize::stream::{Message, Signer};
    use std::io::Write;
    use tempfile::TempDir;

    fn generate_cert() -> Cert {
        let (cert, _) = CertBuilder::new()
            .add_userid("Test Packager <packager@example.com>")
            .add_signing_subkey()
            .generate()
            .unwrap();
        cert
    }

    fn sign(cert: &Cert, data: &[u8]) -> Vec<u8> {
        let policy = StandardPolicy::new();
        let keypair = cert
            .keys()
            .unencrypted_secret()
            .with_policy(&policy, None)
            .supported()
            .for_signing()
            .next()
            .unwrap()
            .key()
            .clone()
            .into_keypair()
            .unwrap();

        let mut sink = Vec::new();
        let message = Message::new(&mut sink);
        let mut signer = Signer::new(message, keypair).detached().build().unwrap();
        signer.write_all(data).unwrap();
        signer.finalize().unwrap();
        sink
    }

    fn setup() -> (TempDir, Cert, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let gpgdir = temp_dir.path().join("gnupg");
        fs::create_dir_all(&gpgdir).unwrap();

        let cert = generate_cert();
        let mut key_file = fs::File::create(gpgdir.join("packager.pgp")).unwrap();
        cert.serialize(&mut key_file).unwrap();

        let file = temp_dir.path().join("core.db");
        fs::write(&file, b"database contents").unwrap();
        (temp_dir, cert, file)
    }

    #[test]
    fn test_signature_path() {
        assert_eq!(
            signature_path(Path::new("/var/lib/pacman/sync/core.db")),
            PathBuf::from("/var/lib/pacman/sync/core.db.sig")
        );
    }

    #[test]
    fn test_unsigned_file_against_requirements() {
        let (temp_dir, _cert, file) = setup();
        let gpgdir = temp_dir.path().join("gnupg");

        assert!(check_file(&file, SigRequirement::Never, &gpgdir).is_ok());
        assert!(check_file(&file, SigRequirement::Optional, &gpgdir).is_ok());
        assert_eq!(
            check_file(&file, SigRequirement::Required, &gpgdir)
                .unwrap_err()
                .code,
            ErrorCode::SigMissing
        );
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let (temp_dir, cert, file) = setup();
        let gpgdir = temp_dir.path().join("gnupg");

        fs::write(signature_path(&file), sign(&cert, b"database contents")).unwrap();
        assert!(check_file(&file, SigRequirement::Required, &gpgdir).is_ok());
    }

    #[test]
    fn test_tampered_file_is_rejected() {
        let (temp_dir, cert, file) = setup();
        let gpgdir = temp_dir.path().join("gnupg");

        fs::write(signature_path(&file), sign(&cert, b"database contents")).unwrap();
        fs::write(&file, b"tampered contents").unwrap();

        // Present signatures are checked even when optional
        let err = check_file(&file, SigRequirement::Optional, &gpgdir).unwrap_err();
        assert_eq!(err.code, ErrorCode::SigInvalid);
    }

    #[test]
    fn test_unknown_signer_is_rejected() {
        let (temp_dir, _cert, file) = setup();
        let gpgdir = temp_dir.path().join("gnupg");

        let stranger = generate_cert();
        fs::write(signature_path(&file), sign(&stranger, b"database contents")).unwrap();
        let err = check_file(&file, SigRequirement::Required, &gpgdir).unwrap_err();
        assert_eq!(err.code, ErrorCode::SigInvalid);
    }
}
