// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

//! Stand-ins for the external collaborators, shared by the unit tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::assemble::Assembler;
use crate::error::BoxError;
use crate::kernel::KernelVersionProber;
use crate::logger::BuildLog;
use crate::measure::{MeasurementEngine, PcrSignature, SystemdMeasurer};
use crate::pesign::PeSigningScheme;
use crate::section::{MeasuredSections, Section, SectionName};
use crate::signer::{PcrSigner, SecureBootSigner};
use crate::stub::SbatReader;

pub struct FakeSecureBootSigner {
    certificate: Vec<u8>,
}

impl Default for FakeSecureBootSigner {
    fn default() -> Self {
        FakeSecureBootSigner {
            certificate: b"test certificate".to_vec(),
        }
    }
}

impl FakeSecureBootSigner {
    pub fn without_certificate() -> Self {
        FakeSecureBootSigner {
            certificate: Vec::new(),
        }
    }
}

impl SecureBootSigner for FakeSecureBootSigner {
    fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, BoxError> {
        Ok(Sha256::digest(data).to_vec())
    }
}

/// Appends the signature and a trailer to the image.
#[derive(Default)]
pub struct FakeSigningScheme {
    fail: bool,
}

impl FakeSigningScheme {
    pub const TRAILER: &'static [u8] = b"#signed";

    pub fn failing() -> Self {
        FakeSigningScheme { fail: true }
    }
}

impl PeSigningScheme for FakeSigningScheme {
    fn sign_image(
        &self,
        image: &[u8],
        signer: &dyn SecureBootSigner,
    ) -> Result<Vec<u8>, BoxError> {
        if self.fail {
            return Err("signing scheme failure".into());
        }
        let mut signed = image.to_vec();
        signed.extend_from_slice(&signer.sign(image)?);
        signed.extend_from_slice(Self::TRAILER);
        Ok(signed)
    }
}

/// One `Assembler::assemble` invocation with the content of every section.
#[derive(Clone, Debug)]
pub struct AssembleCall {
    pub stub: PathBuf,
    pub scratch_dir: PathBuf,
    pub sections: Vec<(SectionName, Vec<u8>)>,
}

/// Concatenates the stub and the sections, keeping a record of each call.
#[derive(Default)]
pub struct RecordingAssembler {
    calls: Mutex<Vec<AssembleCall>>,
    fail: bool,
    // Write the image here and delete the scratch directory behind the builder's back.
    remove_scratch: Option<PathBuf>,
}

impl RecordingAssembler {
    pub fn failing() -> Self {
        RecordingAssembler {
            fail: true,
            ..Default::default()
        }
    }

    pub fn removing_scratch(output_dir: &Path) -> Self {
        RecordingAssembler {
            remove_scratch: Some(output_dir.to_path_buf()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<AssembleCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Assembler for RecordingAssembler {
    fn assemble(
        &self,
        stub: &Path,
        sections: &[&Section],
        scratch_dir: &Path,
    ) -> Result<PathBuf, BoxError> {
        if self.fail {
            return Err("assembler failure".into());
        }

        let mut image = fs::read(stub)?;
        let mut contents = Vec::new();
        for section in sections {
            let data = fs::read(&section.path)?;
            image.extend_from_slice(&data);
            contents.push((section.name, data));
        }
        self.calls.lock().unwrap().push(AssembleCall {
            stub: stub.to_path_buf(),
            scratch_dir: scratch_dir.to_path_buf(),
            sections: contents,
        });

        let output = match &self.remove_scratch {
            Some(dir) => {
                fs::remove_dir_all(scratch_dir)?;
                dir.join("uki.unsigned.efi")
            }
            None => scratch_dir.join("uki.unsigned.efi"),
        };
        fs::write(&output, image)?;
        Ok(output)
    }
}

/// `SystemdMeasurer` that keeps the content of every measured set.
#[derive(Default)]
pub struct RecordingMeasurer {
    measured: Mutex<Vec<BTreeMap<SectionName, Vec<u8>>>>,
}

impl RecordingMeasurer {
    pub fn measured(&self) -> Vec<BTreeMap<SectionName, Vec<u8>>> {
        self.measured.lock().unwrap().clone()
    }
}

impl MeasurementEngine for RecordingMeasurer {
    fn generate_signed_measurement(
        &self,
        sections: &MeasuredSections,
        signer: &dyn PcrSigner,
        pcr: u32,
    ) -> Result<PcrSignature, BoxError> {
        let mut contents = BTreeMap::new();
        for (name, path) in sections {
            contents.insert(*name, fs::read(path)?);
        }
        self.measured.lock().unwrap().push(contents);
        SystemdMeasurer::new().generate_signed_measurement(sections, signer, pcr)
    }

    fn print_measurements(&self, sections: &MeasuredSections, pcr: u32, log: &BuildLog) {
        SystemdMeasurer::new().print_measurements(sections, pcr, log)
    }
}

/// SBAT reader returning fixed metadata whatever the stub.
pub struct StaticSbatReader(pub Vec<u8>);

impl SbatReader for StaticSbatReader {
    fn read_sbat(&self, _stub: &Path) -> Result<Vec<u8>, BoxError> {
        Ok(self.0.clone())
    }
}

/// Prober returning a fixed version.
pub struct StaticProber(pub String);

impl KernelVersionProber for StaticProber {
    fn discover_version(&self, _kernel: &Path) -> Result<String, BoxError> {
        Ok(self.0.clone())
    }
}
