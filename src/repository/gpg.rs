// src/repository/gpg.rs

//! Apt signing keyring
//!
//! The keys referenced by the policy's apt repositories are fetched, parsed
//! with sequoia-openpgp, and written as a binary OpenPGP keyring that apt
//! reads from `trusted.gpg.d`. Keys are compared by fingerprint so the
//! keyring is rewritten only when the set of trusted keys changes.

use crate::atomic::write_atomic;
use crate::client::HttpClient;
use crate::error::{Error, Result};
use crate::exec::CancelToken;
use openpgp::cert::prelude::*;
use openpgp::parse::Parse;
use openpgp::serialize::Serialize;
use sequoia_openpgp as openpgp;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// Largest key body accepted from a key URL
pub const MAX_KEY_SIZE: u64 = 1024 * 1024;

/// Where key material comes from
pub trait KeyFetcher {
    fn fetch_key(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>>;
}

impl KeyFetcher for HttpClient {
    fn fetch_key(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>> {
        self.fetch_capped(url, MAX_KEY_SIZE, cancel)
    }
}

/// Parse every certificate in `data`, armored or binary
pub fn parse_certs(data: &[u8]) -> Result<Vec<Cert>> {
    let parser = CertParser::from_bytes(data)
        .map_err(|e| Error::ParseError(format!("Failed to parse OpenPGP data: {e}")))?;
    let certs = parser
        .map(|cert| cert.map_err(|e| Error::ParseError(format!("Failed to parse OpenPGP key: {e}"))))
        .collect::<Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(Error::ParseError("No OpenPGP keys found".to_string()));
    }
    Ok(certs)
}

/// Fingerprints of the keys currently in the keyring, empty if it is missing
/// or unreadable
fn existing_fingerprints(path: &Path) -> BTreeSet<String> {
    let data = match fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return BTreeSet::new(),
        Err(e) => {
            warn!("Failed to read keyring {}: {}", path.display(), e);
            return BTreeSet::new();
        }
    };
    match parse_certs(&data) {
        Ok(certs) => certs.iter().map(|c| c.fingerprint().to_hex()).collect(),
        Err(e) => {
            warn!("Keyring {} is unreadable, it will be rewritten: {}", path.display(), e);
            BTreeSet::new()
        }
    }
}

/// Bring the keyring at `path` in line with the keys behind `key_urls`
///
/// Every key must be fetched and parsed before the keyring is touched, so a
/// transient failure never drops a key that is already trusted. With no key
/// URLs the keyring file is removed. Returns whether the file changed.
pub fn sync_keyring(
    path: &Path,
    key_urls: &[String],
    fetcher: &dyn KeyFetcher,
    cancel: &CancelToken,
) -> Result<bool> {
    let mut desired: BTreeMap<String, Cert> = BTreeMap::new();
    for url in key_urls {
        let data = fetcher.fetch_key(url, cancel)?;
        for cert in parse_certs(&data)? {
            let fingerprint = cert.fingerprint().to_hex();
            debug!("Key {} from {}", fingerprint, url);
            match desired.remove(&fingerprint) {
                Some(existing) => {
                    let merged = existing
                        .merge_public(cert)
                        .map_err(|e| Error::ParseError(format!("Failed to merge key {fingerprint}: {e}")))?;
                    desired.insert(fingerprint, merged);
                }
                None => {
                    desired.insert(fingerprint, cert);
                }
            }
        }
    }

    if desired.is_empty() {
        return match fs::remove_file(path) {
            Ok(()) => {
                info!("Removed keyring {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::IoError(format!(
                "Failed to remove keyring {}: {}",
                path.display(),
                e
            ))),
        };
    }

    let wanted: BTreeSet<String> = desired.keys().cloned().collect();
    if existing_fingerprints(path) == wanted {
        debug!("Keyring {} already holds {} keys", path.display(), wanted.len());
        return Ok(false);
    }

    let mut keyring = Vec::new();
    for cert in desired.values() {
        cert.serialize(&mut keyring)
            .map_err(|e| Error::IoError(format!("Failed to serialize key {}: {e}", cert.fingerprint())))?;
    }
    write_atomic(path, &keyring, 0o644)?;
    info!("Wrote {} keys to {}", wanted.len(), path.display());
    Ok(true)
}
