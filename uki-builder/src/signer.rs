// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

//! Signing capabilities.
//!
//! A build needs two of them: one signs the PCR policy, the other signs PE binaries for
//! Secure Boot. Callers either hand in ready-made capabilities or point at key files, in which
//! case RSA keys are loaded here and used with RSASSA-PKCS1-v1_5/SHA-256.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ring::rand;
use ring::signature::{KeyPair, RsaKeyPair, RSA_PKCS1_SHA256};
use zeroize::Zeroize;

use crate::config::BuildConfig;
use crate::error::{BoxError, Error, Result};
use crate::io::{InputData, MAX_KEY_SIZE};
use crate::public_key;

/// Signs the PCR policy digest.
pub trait PcrSigner: Send + Sync {
    /// DER encoded SubjectPublicKeyInfo of the verification key.
    fn public_key_der(&self) -> core::result::Result<Vec<u8>, BoxError>;

    fn sign(&self, data: &[u8]) -> core::result::Result<Vec<u8>, BoxError>;
}

/// Signs PE images for Secure Boot.
pub trait SecureBootSigner: Send + Sync {
    /// DER encoded X.509 certificate embedded next to the signature.
    fn certificate(&self) -> &[u8];

    fn sign(&self, data: &[u8]) -> core::result::Result<Vec<u8>, BoxError>;
}

fn rsa_sign(key: &RsaKeyPair, data: &[u8]) -> core::result::Result<Vec<u8>, BoxError> {
    let rng = rand::SystemRandom::new();
    let mut signature = vec![0u8; key.public().modulus_len()];
    key.sign(&RSA_PKCS1_SHA256, &rng, data, &mut signature)
        .map_err(|_| "RSA PKCS#1 v1.5 signing failed")?;
    Ok(signature)
}

/// PCR signer backed by an RSA private key.
pub struct RsaPcrSigner {
    key: RsaKeyPair,
    spki: Vec<u8>,
}

impl RsaPcrSigner {
    pub fn new(key: RsaKeyPair) -> Result<Self> {
        let spki = public_key::rsa_spki_der(key.public_key().as_ref())
            .map_err(|e| Error::signing(format!("can not encode PCR public key: {}", e)))?;
        Ok(RsaPcrSigner { key, spki })
    }

    pub fn from_key_file(path: &Path) -> Result<Self> {
        Self::new(load_rsa_key(path)?)
    }
}

impl PcrSigner for RsaPcrSigner {
    fn public_key_der(&self) -> core::result::Result<Vec<u8>, BoxError> {
        Ok(self.spki.clone())
    }

    fn sign(&self, data: &[u8]) -> core::result::Result<Vec<u8>, BoxError> {
        rsa_sign(&self.key, data)
    }
}

/// Secure Boot signer made of a certificate and its RSA private key.
pub struct CertificateSigner {
    certificate: Vec<u8>,
    key: RsaKeyPair,
}

impl CertificateSigner {
    pub fn new(certificate: Vec<u8>, key: RsaKeyPair) -> Self {
        CertificateSigner { certificate, key }
    }

    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let certificate = load_certificate(cert_path)?;
        let key = load_rsa_key(key_path)?;
        Ok(Self::new(certificate, key))
    }
}

impl SecureBootSigner for CertificateSigner {
    fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    fn sign(&self, data: &[u8]) -> core::result::Result<Vec<u8>, BoxError> {
        rsa_sign(&self.key, data)
    }
}

fn is_pem(data: &[u8]) -> bool {
    data.starts_with(b"-----BEGIN ")
}

/// Load an RSA private key from a PEM (PKCS#8 or PKCS#1) or DER file.
pub fn load_rsa_key(path: &Path) -> Result<RsaKeyPair> {
    let mut input = InputData::new(path, 1..=MAX_KEY_SIZE, "private key")?;
    let parsed = parse_rsa_key(input.as_bytes());
    input.clear();

    parsed.map_err(|e| {
        Error::Config(format!("invalid private key {}: {}", path.display(), e))
    })
}

fn parse_rsa_key(data: &[u8]) -> core::result::Result<RsaKeyPair, String> {
    if !is_pem(data) {
        return RsaKeyPair::from_pkcs8(data)
            .or_else(|_| RsaKeyPair::from_der(data))
            .map_err(|e| e.to_string());
    }

    let (label, mut der) = der::pem::decode_vec(data).map_err(|e| e.to_string())?;
    let key = match label {
        "PRIVATE KEY" => RsaKeyPair::from_pkcs8(&der).map_err(|e| e.to_string()),
        "RSA PRIVATE KEY" => RsaKeyPair::from_der(&der).map_err(|e| e.to_string()),
        _ => Err(format!("unsupported PEM label {}", label)),
    };
    der.zeroize();
    key
}

/// Load a certificate from a PEM `CERTIFICATE` or DER file. The content is not validated.
pub fn load_certificate(path: &Path) -> Result<Vec<u8>> {
    let input = InputData::new(path, 1..=MAX_KEY_SIZE, "certificate")?;
    if !is_pem(input.as_bytes()) {
        return Ok(input.into_vec());
    }

    match der::pem::decode_vec(input.as_bytes()) {
        Ok(("CERTIFICATE", der)) if !der.is_empty() => Ok(der),
        Ok((label, _)) => Err(Error::Config(format!(
            "invalid certificate {}: unexpected PEM label {}",
            path.display(),
            label
        ))),
        Err(e) => Err(Error::Config(format!(
            "invalid certificate {}: {}",
            path.display(),
            e
        ))),
    }
}

/// The two capabilities a build signs with.
#[derive(Clone)]
pub struct Signers {
    pub pcr: Arc<dyn PcrSigner>,
    pub secure_boot: Arc<dyn SecureBootSigner>,
}

impl Signers {
    /// Pick the supplied capabilities, or derive them from key material.
    ///
    /// Touches nothing but the key files, so it can run before any scratch state exists.
    pub fn resolve(config: &BuildConfig) -> Result<Self> {
        let pcr: Arc<dyn PcrSigner> = match (&config.pcr_signer, &config.pcr_key_path) {
            (Some(signer), _) => signer.clone(),
            (None, Some(path)) => Arc::new(RsaPcrSigner::from_key_file(path)?),
            (None, None) => {
                return Err(Error::Config(
                    "no PCR signer or PCR signing key configured".to_string(),
                ))
            }
        };

        let secure_boot: Arc<dyn SecureBootSigner> = match (
            &config.secure_boot_signer,
            &config.secure_boot_cert_path,
            &config.secure_boot_key_path,
        ) {
            (Some(signer), _, _) => signer.clone(),
            (None, Some(cert), Some(key)) => Arc::new(CertificateSigner::from_files(cert, key)?),
            _ => {
                return Err(Error::Config(
                    "no Secure Boot signer or certificate and key pair configured".to_string(),
                ))
            }
        };

        Ok(Signers { pcr, secure_boot })
    }
}

impl fmt::Debug for Signers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signers").finish_non_exhaustive()
    }
}
