//! Server certificate material.
//!
//! The endpoint never interprets the identity; it is handed unchanged to the
//! per-connection protocol layer that performs TLS.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// DER-encoded certificate chain and private key.
#[derive(Clone)]
pub struct ServerIdentity {
    cert_chain: Vec<Vec<u8>>,
    private_key: Vec<u8>,
}

impl ServerIdentity {
    /// Load a PEM certificate chain and private key.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, std::io::Error> {
        // Basic validation
        if !cert_path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Certificate file not found: {:?}", cert_path),
            ));
        }
        if !key_path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Private key file not found: {:?}", key_path),
            ));
        }

        let mut reader = BufReader::new(File::open(cert_path)?);
        let cert_chain = rustls_pemfile::certs(&mut reader)
            .map(|cert| cert.map(|c| c.to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        if cert_chain.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("No certificates in {:?}", cert_path),
            ));
        }

        let mut reader = BufReader::new(File::open(key_path)?);
        let private_key = rustls_pemfile::private_key(&mut reader)?
            .map(|key| key.secret_der().to_vec())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("No private key in {:?}", key_path),
                )
            })?;

        Ok(Self {
            cert_chain,
            private_key,
        })
    }

    pub fn cert_chain(&self) -> &[Vec<u8>] {
        &self.cert_chain
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl std::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("certificates", &self.cert_chain.len())
            .finish_non_exhaustive()
    }
}
