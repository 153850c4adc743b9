// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::LevelFilter;

use crate::error::{Error, Result};
use crate::measure::DEFAULT_PCR;
use crate::signer::{PcrSigner, SecureBootSigner};

pub const DEFAULT_OS_NAME: &str = "Linux";

/// Inputs of one UKI build.
///
/// For each signing role either a ready capability or key material has to be given. A
/// capability always wins over key files.
pub struct BuildConfig {
    /// UEFI boot stub the sections are attached to, e.g. systemd-stub.
    pub stub_path: PathBuf,
    pub kernel_path: PathBuf,
    pub initrd_path: PathBuf,
    /// os-release to embed. A minimal one is generated when absent.
    pub os_release_path: Option<PathBuf>,
    /// Boot splash bitmap. A bundled one is used when absent.
    pub splash_path: Option<PathBuf>,
    /// Boot loader to sign alongside the UKI, e.g. systemd-boot.
    pub boot_loader_path: Option<PathBuf>,
    pub signed_boot_loader_path: Option<PathBuf>,
    /// Signed UKI.
    pub output_path: PathBuf,
    pub cmdline: String,

    pub pcr_signer: Option<Arc<dyn PcrSigner>>,
    pub pcr_key_path: Option<PathBuf>,
    pub secure_boot_signer: Option<Arc<dyn SecureBootSigner>>,
    pub secure_boot_cert_path: Option<PathBuf>,
    pub secure_boot_key_path: Option<PathBuf>,

    pub log_level: LevelFilter,
    pub os_name: String,
    pub version: String,
    pub pcr: u32,
    /// Directory the scratch directory is created in, the system temp dir by default.
    pub scratch_root: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            stub_path: PathBuf::new(),
            kernel_path: PathBuf::new(),
            initrd_path: PathBuf::new(),
            os_release_path: None,
            splash_path: None,
            boot_loader_path: None,
            signed_boot_loader_path: None,
            output_path: PathBuf::new(),
            cmdline: String::new(),
            pcr_signer: None,
            pcr_key_path: None,
            secure_boot_signer: None,
            secure_boot_cert_path: None,
            secure_boot_key_path: None,
            log_level: LevelFilter::Info,
            os_name: DEFAULT_OS_NAME.to_string(),
            version: String::new(),
            pcr: DEFAULT_PCR,
            scratch_root: None,
        }
    }
}

impl BuildConfig {
    /// Check settings that depend on each other.
    pub fn validate(&self) -> Result<()> {
        if self.boot_loader_path.is_some() && self.signed_boot_loader_path.is_none() {
            return Err(Error::Config(
                "boot loader given without an output path for the signed copy".to_string(),
            ));
        }
        Ok(())
    }

    /// Minimal os-release describing `os_name` and `version`.
    pub fn os_release(&self) -> String {
        let id = self.os_name.trim().to_lowercase().replace(' ', "-");
        let pretty_name = if self.version.is_empty() {
            self.os_name.clone()
        } else {
            format!("{} ({})", self.os_name, self.version)
        };
        format!(
            "NAME=\"{}\"\nID={}\nVERSION_ID={}\nPRETTY_NAME=\"{}\"\n",
            self.os_name, id, self.version, pretty_name
        )
    }
}

impl fmt::Debug for BuildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildConfig")
            .field("stub_path", &self.stub_path)
            .field("kernel_path", &self.kernel_path)
            .field("initrd_path", &self.initrd_path)
            .field("os_release_path", &self.os_release_path)
            .field("splash_path", &self.splash_path)
            .field("boot_loader_path", &self.boot_loader_path)
            .field("signed_boot_loader_path", &self.signed_boot_loader_path)
            .field("output_path", &self.output_path)
            .field("cmdline", &self.cmdline)
            .field("pcr_signer", &self.pcr_signer.is_some())
            .field("pcr_key_path", &self.pcr_key_path)
            .field("secure_boot_signer", &self.secure_boot_signer.is_some())
            .field("secure_boot_cert_path", &self.secure_boot_cert_path)
            .field("secure_boot_key_path", &self.secure_boot_key_path)
            .field("log_level", &self.log_level)
            .field("os_name", &self.os_name)
            .field("version", &self.version)
            .field("pcr", &self.pcr)
            .field("scratch_root", &self.scratch_root)
            .finish()
    }
}
