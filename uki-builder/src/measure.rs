// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

//! PCR measurement of UKI sections and signed PCR policies.
//!
//! `SystemdMeasurer` predicts the PCR value systemd-stub and systemd produce while booting a
//! UKI, then signs a TPM2 PolicyPCR digest for every boot phase. The resulting JSON is the
//! `.pcrsig` section systemd-cryptsetup uses to unlock TPM-bound volumes.

use std::fs::File;
use std::io;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use scroll::{Pwrite, BE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BoxError;
use crate::logger::BuildLog;
use crate::public_key;
use crate::section::{MeasuredSections, SectionName};
use crate::signer::PcrSigner;

/// PCR systemd-stub measures UKI sections into.
pub const DEFAULT_PCR: u32 = 11;

/// Boot phases systemd measures into PCR 11 after the UKI sections, in order.
pub const BOOT_PHASES: [&str; 4] = ["enter-initrd", "leave-initrd", "sysinit", "ready"];

const SHA256_DIGEST_SIZE: usize = 32;
const TPM_CC_POLICY_PCR: u32 = 0x0000_017F;
const TPM_ALG_SHA256: u16 = 0x000B;
const PCR_SELECT_SIZE: usize = 3;
// count(4) + hash(2) + sizeofSelect(1) + pcrSelect(3)
const TPML_PCR_SELECTION_SIZE: usize = 10;

/// Signed PCR policies, serialized as the systemd `.pcrsig` JSON.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PcrSignature {
    pub sha256: Vec<BankData>,
}

/// One signed policy of a PCR bank.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BankData {
    pub pcrs: Vec<u32>,
    /// SHA256 fingerprint of the signing key's SubjectPublicKeyInfo, hex.
    pub pkfp: String,
    /// PolicyPCR digest, hex.
    pub pol: String,
    /// Signature over `pol`, base64.
    pub sig: String,
}

/// Computes PCR measurements of a set of sections and signs the resulting policy.
pub trait MeasurementEngine: Send + Sync {
    fn generate_signed_measurement(
        &self,
        sections: &MeasuredSections,
        signer: &dyn PcrSigner,
        pcr: u32,
    ) -> core::result::Result<PcrSignature, BoxError>;

    /// Log the expected PCR value of every boot phase at debug level.
    fn print_measurements(&self, sections: &MeasuredSections, pcr: u32, log: &BuildLog);
}

// TPML_PCR_SELECTION with a single TPMS_PCR_SELECTION.
#[derive(Debug, Pwrite)]
struct TpmlPcrSelection {
    count: u32,
    hash: u16,
    size_of_select: u8,
    // scroll_derive needs a literal length, always PCR_SELECT_SIZE.
    pcr_select: [u8; 3],
}

impl TpmlPcrSelection {
    fn sha256(pcr: u32) -> Self {
        let mut pcr_select = [0u8; PCR_SELECT_SIZE];
        pcr_select[(pcr / 8) as usize] |= 1 << (pcr % 8);
        TpmlPcrSelection {
            count: 1,
            hash: TPM_ALG_SHA256,
            size_of_select: PCR_SELECT_SIZE as u8,
            pcr_select,
        }
    }
}

/// Software model of one sha256 PCR.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PcrBank {
    value: [u8; SHA256_DIGEST_SIZE],
}

impl PcrBank {
    pub fn value(&self) -> &[u8; SHA256_DIGEST_SIZE] {
        &self.value
    }

    pub fn extend_digest(&mut self, digest: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.value);
        hasher.update(digest);
        self.value = hasher.finalize().into();
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.extend_digest(&Sha256::digest(data))
    }
}

/// PCR value and policy digest once a boot phase has been reached.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhaseMeasurement {
    /// Colon separated phases measured so far, e.g. `enter-initrd:leave-initrd`.
    pub phase: String,
    pub pcr_value: [u8; SHA256_DIGEST_SIZE],
    pub policy: [u8; SHA256_DIGEST_SIZE],
}

/// TPM2_PolicyPCR digest for a trial session starting from an empty policy.
pub fn policy_pcr_digest(
    pcr: u32,
    pcr_value: &[u8; SHA256_DIGEST_SIZE],
) -> core::result::Result<[u8; SHA256_DIGEST_SIZE], BoxError> {
    if pcr as usize >= PCR_SELECT_SIZE * 8 {
        return Err(format!("PCR index {} out of range", pcr).into());
    }

    let mut buf = [0u8; 4 + TPML_PCR_SELECTION_SIZE];
    let offset = &mut 0;
    buf.gwrite_with(TPM_CC_POLICY_PCR, offset, BE)?;
    buf.gwrite_with(&TpmlPcrSelection::sha256(pcr), offset, BE)?;

    let mut hasher = Sha256::new();
    hasher.update([0u8; SHA256_DIGEST_SIZE]);
    hasher.update(&buf[..*offset]);
    hasher.update(Sha256::digest(pcr_value));
    Ok(hasher.finalize().into())
}

/// Reference engine computing what `systemd-measure sign` computes, sha256 bank only.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemdMeasurer;

impl SystemdMeasurer {
    pub fn new() -> Self {
        SystemdMeasurer
    }

    /// PCR value after systemd-stub has measured `sections`.
    pub fn measure_sections(
        &self,
        sections: &MeasuredSections,
    ) -> core::result::Result<PcrBank, BoxError> {
        let mut bank = PcrBank::default();
        // BTreeMap iteration follows the measurement order of `SectionName`.
        for (name, path) in sections {
            if !name.is_measured() {
                return Err(format!("section {} must not be measured", name).into());
            }

            let mut name_bytes = name.pe_name().as_bytes().to_vec();
            name_bytes.push(0);
            bank.extend(&name_bytes);

            let mut file = File::open(path)
                .map_err(|e| format!("can not open section {} {}: {}", name, path.display(), e))?;
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)
                .map_err(|e| format!("can not read section {} {}: {}", name, path.display(), e))?;
            bank.extend_digest(&hasher.finalize());
        }
        Ok(bank)
    }

    /// Measurements for every boot phase.
    pub fn measure(
        &self,
        sections: &MeasuredSections,
        pcr: u32,
    ) -> core::result::Result<Vec<PhaseMeasurement>, BoxError> {
        let mut bank = self.measure_sections(sections)?;
        let mut phases = Vec::with_capacity(BOOT_PHASES.len());
        for (idx, phase) in BOOT_PHASES.iter().enumerate() {
            bank.extend(phase.as_bytes());
            phases.push(PhaseMeasurement {
                phase: BOOT_PHASES[..=idx].join(":"),
                pcr_value: *bank.value(),
                policy: policy_pcr_digest(pcr, bank.value())?,
            });
        }
        Ok(phases)
    }
}

impl MeasurementEngine for SystemdMeasurer {
    fn generate_signed_measurement(
        &self,
        sections: &MeasuredSections,
        signer: &dyn PcrSigner,
        pcr: u32,
    ) -> core::result::Result<PcrSignature, BoxError> {
        if sections.contains_key(&SectionName::PcrSignature) {
            return Err("PCR signature section in the measured set".into());
        }

        let pkfp = hex::encode(public_key::fingerprint(&signer.public_key_der()?));
        let mut signature = PcrSignature::default();
        for phase in self.measure(sections, pcr)? {
            let sig = signer.sign(&phase.policy)?;
            signature.sha256.push(BankData {
                pcrs: vec![pcr],
                pkfp: pkfp.clone(),
                pol: hex::encode(phase.policy),
                sig: STANDARD.encode(sig),
            });
        }
        Ok(signature)
    }

    fn print_measurements(&self, sections: &MeasuredSections, pcr: u32, log: &BuildLog) {
        match self.measure(sections, pcr) {
            Ok(phases) => {
                for phase in phases {
                    log.debug(format_args!(
                        "{}: {}:sha256={}",
                        phase.phase,
                        pcr,
                        hex::encode(phase.pcr_value)
                    ));
                }
            }
            Err(e) => log.warn(format_args!("can not compute PCR measurements: {}", e)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::logger::test::RecordingSink;
    use crate::signer::RsaPcrSigner;
    use log::{Level, LevelFilter};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    const PHASE_PCRS: [&str; 4] = [
        "c389e0ed1bcc549759ea72b96c37c77028c7543cb353f54ffa59fd6cbd03c0ef",
        "50b925e0e2fc9420d942efa0287ae5a33d667401ffa3b296c623f9ca53179944",
        "c418e885e6a0ec5eb783cea86597839ee7d0119ac77d7df192a230f2da664a24",
        "0c59031f8b6a8662fb6cd15fb77f806e55b8b63872ac60608192b2dca1ebe53a",
    ];
    const PHASE_POLICIES: [&str; 4] = [
        "21b3b31951a927001ceb703a30aeb845e4da6c0451e265aad3acf6c65722680a",
        "521df9709edb80a6713e5b7a1e410d58d00297da336400214c7aa43badc3dff6",
        "02116ea9fc834fd14b77678568ef440b5edb2020c99117c515480bebd769b49d",
        "c193c5024fac7b7f23bd02b86048aaecdc15941a5c524e34a659d81b7a6ed79d",
    ];
    const PCR_KEY_FINGERPRINT: &str =
        "bc86704e58d7613847ddce477b8c81e6f69a237dc80b40f7d2f5064bdcedf350";
    // openssl dgst -sha256 -sign data/pcr-key.pem <enter-initrd policy>
    const ENTER_INITRD_SIG: &str = "vJou1fPjf/Qcd6C6UWSdNeHlo6mZHp1mmidk0YGxe9AVMlKDtGO4FqiRFCzabhdW\
        K9xa4tAZA1eFa1QjFy1i6lOXBOx24q9Vehv3hDhIEy/ne6dzsUs/CbftB7a6DTWfJ9X/kLdOl0b2LzekghJRXfbDf\
        /sLI0dOhPPIf0eASawtXETLEgs1YsBoXjR4ekjKvNMUO6DVi7QB8Ifv+a899hnshOYTlJ/ZxDRBNLYioL3OpcsTaarH\
        jBfU/mVfIOF9fCkn2brnB0I242IKVQrOq86zLTbdIZBPOWvtKU/vmyxqiPCNvLbvpVVekuh/VvWWauU1i7K/aULC2W8\
        AyYDFHg==";

    fn sections(dir: &Path) -> MeasuredSections {
        let mut sections = MeasuredSections::new();
        // Inserted out of order on purpose.
        for (name, content) in [
            (SectionName::Cmdline, &b"console=ttyS0 reboot=k"[..]),
            (SectionName::OsRelease, &b"ID=test\n"[..]),
            (SectionName::Kernel, &b"kernel image"[..]),
        ] {
            let path = dir.join(name.pe_name().trim_start_matches('.'));
            fs::write(&path, content).unwrap();
            sections.insert(name, path);
        }
        sections
    }

    fn pcr_signer() -> RsaPcrSigner {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/pcr-key.pem");
        RsaPcrSigner::from_key_file(&path).unwrap()
    }

    #[test]
    fn test_pcr_extend() {
        let mut bank = PcrBank::default();
        bank.extend(b"");
        // SHA256(0^32 || SHA256(""))
        let mut expected = Sha256::new();
        expected.update([0u8; 32]);
        expected.update(Sha256::digest(b""));
        assert_eq!(bank.value().as_slice(), expected.finalize().as_slice());
    }

    #[test]
    fn test_policy_pcr_digest_range() {
        assert!(policy_pcr_digest(23, &[0u8; 32]).is_ok());
        assert!(policy_pcr_digest(24, &[0u8; 32]).is_err());
    }

    #[test]
    fn test_measure_phases() {
        let dir = tempfile::tempdir().unwrap();
        let phases = SystemdMeasurer::new()
            .measure(&sections(dir.path()), DEFAULT_PCR)
            .unwrap();

        assert_eq!(phases.len(), BOOT_PHASES.len());
        assert_eq!(phases[0].phase, "enter-initrd");
        assert_eq!(phases[3].phase, "enter-initrd:leave-initrd:sysinit:ready");
        for (idx, phase) in phases.iter().enumerate() {
            assert_eq!(hex::encode(phase.pcr_value), PHASE_PCRS[idx]);
            assert_eq!(hex::encode(phase.policy), PHASE_POLICIES[idx]);
        }
    }

    #[test]
    fn test_signed_measurement() {
        let dir = tempfile::tempdir().unwrap();
        let sections = sections(dir.path());
        let signer = pcr_signer();
        let engine = SystemdMeasurer::new();

        let signature = engine
            .generate_signed_measurement(&sections, &signer, DEFAULT_PCR)
            .unwrap();
        assert_eq!(signature.sha256.len(), 4);
        for (idx, bank) in signature.sha256.iter().enumerate() {
            assert_eq!(bank.pcrs, vec![11]);
            assert_eq!(bank.pkfp, PCR_KEY_FINGERPRINT);
            assert_eq!(bank.pol, PHASE_POLICIES[idx]);
        }
        assert_eq!(signature.sha256[0].sig, ENTER_INITRD_SIG.replace(' ', ""));

        // Same inputs, same bytes.
        let again = engine
            .generate_signed_measurement(&sections, &signer, DEFAULT_PCR)
            .unwrap();
        assert_eq!(
            serde_json::to_vec(&signature).unwrap(),
            serde_json::to_vec(&again).unwrap()
        );
    }

    #[test]
    fn test_signature_json() {
        let signature = PcrSignature {
            sha256: vec![BankData {
                pcrs: vec![11],
                pkfp: "aa".to_string(),
                pol: "bb".to_string(),
                sig: "cc".to_string(),
            }],
        };
        assert_eq!(
            serde_json::to_string(&signature).unwrap(),
            r#"{"sha256":[{"pcrs":[11],"pkfp":"aa","pol":"bb","sig":"cc"}]}"#
        );
    }

    #[test]
    fn test_reject_pcr_signature_section() {
        let dir = tempfile::tempdir().unwrap();
        let mut sections = sections(dir.path());
        sections.insert(SectionName::PcrSignature, dir.path().join("pcrsig"));

        let res = SystemdMeasurer::new().generate_signed_measurement(
            &sections,
            &pcr_signer(),
            DEFAULT_PCR,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_missing_section_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sections = sections(dir.path());
        sections.insert(SectionName::Initrd, dir.path().join("missing"));
        let err = SystemdMeasurer::new()
            .measure(&sections, DEFAULT_PCR)
            .unwrap_err();
        assert!(err.to_string().contains("can not open section .initrd"));
    }

    #[test]
    fn test_print_measurements() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let log = BuildLog::new(sink.clone(), LevelFilter::Debug);

        SystemdMeasurer::new().print_measurements(&sections(dir.path()), DEFAULT_PCR, &log);
        assert!(sink.contains(
            Level::Debug,
            &format!("enter-initrd: 11:sha256={}", PHASE_PCRS[0])
        ));
        assert_eq!(sink.records().len(), 4);
    }
}
