// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

//! Build, measure and sign Unified Kernel Images.
//!
//! A UKI is a UEFI boot stub with the kernel, initrd, command line and supporting metadata
//! attached as PE sections. Secure Boot authenticates the image as a whole, and systemd-stub
//! measures its sections into TPM PCR 11. The `.pcrsig` section carries policies, signed
//! ahead of time, that match the values PCR 11 holds at each boot phase.
//!
//! [`Builder`] drives a build. PE signing and PE assembly are provided by the caller through
//! [`PeSigningScheme`] and [`Assembler`].

pub mod assemble;
pub mod builder;
pub mod config;
pub mod error;
mod generate;
pub mod io;
pub mod kernel;
pub mod logger;
pub mod measure;
pub mod pesign;
pub mod public_key;
pub mod scratch;
pub mod section;
pub mod signer;
pub mod stub;

#[cfg(test)]
mod test_util;

pub use assemble::Assembler;
pub use builder::{BuildOutput, Builder, Toolchain};
pub use config::BuildConfig;
pub use error::{BoxError, BuildError, Error, Stage};
pub use generate::DEFAULT_SPLASH;
pub use kernel::{BzImageProber, KernelVersionProber};
pub use logger::{parse_log_level, BuildLog};
pub use measure::{MeasurementEngine, PcrSignature, SystemdMeasurer, DEFAULT_PCR};
pub use pesign::{PeSigner, PeSigningScheme};
pub use section::{MeasuredSections, Section, SectionList, SectionName};
pub use signer::{CertificateSigner, PcrSigner, RsaPcrSigner, SecureBootSigner, Signers};
pub use stub::{PeStubReader, SbatReader};
