//! PEM file loading.
//!
//! All certificate and key files are expected in **PEM format**.

use std::fs;
use std::path::Path;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::{Error, Result};

/// Load all certificates from a PEM file, in file order.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem_data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Config(format!(
                "Failed to parse certs from '{}': {e}",
                path.display()
            ))
        })?;

    if certs.is_empty() {
        return Err(Error::Config(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// Supports PKCS#1 (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`) and SEC1
/// (`EC PRIVATE KEY`) blocks.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no private key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    PrivateKeyDer::from_pem_slice(&pem_data).map_err(|e| {
        Error::Config(format!(
            "No usable private key in '{}': {e}",
            path.display()
        ))
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Config(format!("Cannot read '{}': {e}", path.display())))
}
