// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

use std::path::Path;
use std::sync::Arc;

use crate::error::{BoxError, Error, Result};
use crate::io::{write_atomic, InputData, MAX_INPUT_SIZE};
use crate::signer::SecureBootSigner;

/// Authenticode style PE signing algorithm.
///
/// Implementations embed a signature made with `signer` into the image and return the signed
/// image. The certificate to embed is `signer.certificate()`.
pub trait PeSigningScheme: Send + Sync {
    fn sign_image(
        &self,
        image: &[u8],
        signer: &dyn SecureBootSigner,
    ) -> core::result::Result<Vec<u8>, BoxError>;
}

/// Signs PE files on disk with one Secure Boot capability.
#[derive(Clone)]
pub struct PeSigner {
    scheme: Arc<dyn PeSigningScheme>,
    signer: Arc<dyn SecureBootSigner>,
}

impl PeSigner {
    pub fn new(
        scheme: Arc<dyn PeSigningScheme>,
        signer: Arc<dyn SecureBootSigner>,
    ) -> Result<Self> {
        if signer.certificate().is_empty() {
            return Err(Error::signing("Secure Boot signer has no certificate"));
        }
        Ok(PeSigner { scheme, signer })
    }

    /// Sign `input` into `output`. `output` is replaced atomically and only on success.
    pub fn sign(&self, input: &Path, output: &Path) -> Result<()> {
        let image = InputData::new(input, 1..=MAX_INPUT_SIZE, "PE image")?;
        let signed = self
            .scheme
            .sign_image(image.as_bytes(), self.signer.as_ref())
            .map_err(Error::Signing)?;
        write_atomic(output, &signed, "signed PE image")
    }
}
