// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::assemble::Assembler;
use crate::config::BuildConfig;
use crate::error::{BuildError, Error, Stage, StageContext};
use crate::generate::{GenerateContext, SECTION_STAGES};
use crate::kernel::{BzImageProber, KernelVersionProber};
use crate::logger::BuildLog;
use crate::measure::{MeasurementEngine, SystemdMeasurer};
use crate::pesign::{PeSigner, PeSigningScheme};
use crate::scratch::ScratchDir;
use crate::section::{SectionList, SectionName};
use crate::signer::Signers;
use crate::stub::{PeStubReader, SbatReader};

/// External algorithms a build relies on.
#[derive(Clone)]
pub struct Toolchain {
    pub pe_signing: Arc<dyn PeSigningScheme>,
    pub measurement: Arc<dyn MeasurementEngine>,
    pub assembler: Arc<dyn Assembler>,
    pub kernel_prober: Arc<dyn KernelVersionProber>,
    pub stub_reader: Arc<dyn SbatReader>,
}

impl Toolchain {
    /// Toolchain with the bundled measurement engine, kernel prober and SBAT reader.
    pub fn new(pe_signing: Arc<dyn PeSigningScheme>, assembler: Arc<dyn Assembler>) -> Self {
        Toolchain {
            pe_signing,
            measurement: Arc::new(SystemdMeasurer::new()),
            assembler,
            kernel_prober: Arc::new(BzImageProber::new()),
            stub_reader: Arc::new(PeStubReader::new()),
        }
    }

    pub fn with_measurement(mut self, measurement: Arc<dyn MeasurementEngine>) -> Self {
        self.measurement = measurement;
        self
    }

    pub fn with_kernel_prober(mut self, kernel_prober: Arc<dyn KernelVersionProber>) -> Self {
        self.kernel_prober = kernel_prober;
        self
    }

    pub fn with_stub_reader(mut self, stub_reader: Arc<dyn SbatReader>) -> Self {
        self.stub_reader = stub_reader;
        self
    }
}

impl fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolchain").finish_non_exhaustive()
    }
}

/// Result of a successful build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildOutput {
    /// The signed UKI.
    pub uki_path: PathBuf,
    pub signed_boot_loader_path: Option<PathBuf>,
    /// Sections in assembly order, `.sbat` included.
    pub sections: Vec<SectionName>,
}

/// Builds one signed UKI.
///
/// The steps run strictly in order:
/// 1. resolve the PCR and Secure Boot signers, failing before anything touches the disk;
/// 2. create the scratch directory;
/// 3. sign the boot loader, if one is configured;
/// 4. generate the sections, see `generate::SECTION_STAGES`;
/// 5. assemble the stub and the appended sections;
/// 6. sign the assembled image into the output path.
///
/// The scratch directory is removed once the build is over, whatever its outcome.
pub struct Builder {
    config: BuildConfig,
    toolchain: Toolchain,
    log: BuildLog,
}

impl Builder {
    pub fn new(config: BuildConfig, toolchain: Toolchain) -> Self {
        let log = BuildLog::global(config.log_level);
        Builder {
            config,
            toolchain,
            log,
        }
    }

    /// Send this build's log records to `sink` instead of the global logger.
    pub fn with_log_sink(mut self, sink: Arc<dyn log::Log>) -> Self {
        self.log = BuildLog::new(sink, self.config.log_level);
        self
    }

    pub fn build(&self) -> Result<BuildOutput, BuildError> {
        let signers = self.resolve_signers().stage(Stage::ResolveSigners)?;

        let scratch =
            ScratchDir::create(self.config.scratch_root.as_deref()).stage(Stage::Scratch)?;
        self.log
            .debug(format_args!("using scratch directory {}", scratch.path().display()));

        let result = self.run(&signers, &scratch);

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            self.log.warn(format_args!(
                "failed to remove scratch directory {}: {}",
                scratch_path.display(),
                e
            ));
        }

        match &result {
            Ok(output) => self
                .log
                .info(format_args!("built UKI {}", output.uki_path.display())),
            Err(e) => self.log.error(format_args!("UKI build failed: {}", e)),
        }
        result
    }

    fn resolve_signers(&self) -> crate::error::Result<Signers> {
        self.config.validate()?;
        Signers::resolve(&self.config)
    }

    fn run(&self, signers: &Signers, scratch: &ScratchDir) -> Result<BuildOutput, BuildError> {
        let config = &self.config;

        let mut pe_signer = None;
        let signed_boot_loader_path = match (
            &config.boot_loader_path,
            &config.signed_boot_loader_path,
        ) {
            (Some(input), Some(output)) => {
                self.log.info(format_args!(
                    "signing boot loader {} into {}",
                    input.display(),
                    output.display()
                ));
                let signer = self.pe_signer(signers).stage(Stage::SignBootLoader)?;
                signer.sign(input, output).stage(Stage::SignBootLoader)?;
                pe_signer = Some(signer);
                Some(output.clone())
            }
            _ => {
                self.log
                    .info(format_args!("no boot loader configured, skipping signing"));
                None
            }
        };

        let ctx = GenerateContext {
            config,
            signers,
            toolchain: &self.toolchain,
            scratch,
            log: &self.log,
        };
        let mut sections = SectionList::new();
        for descriptor in SECTION_STAGES.iter() {
            if let Some(section) = (descriptor.generate)(&ctx, &sections).stage(descriptor.stage)? {
                self.log.debug(format_args!(
                    "added section {} from {}",
                    section.name,
                    section.path.display()
                ));
                sections.push(section).stage(descriptor.stage)?;
            }
        }
        sections.check_complete().stage(Stage::Assemble)?;

        self.log.info(format_args!("assembling UKI"));
        let unsigned = self
            .toolchain
            .assembler
            .assemble(&config.stub_path, &sections.appended(), scratch.path())
            .map_err(Error::Assembly)
            .stage(Stage::Assemble)?;

        self.log.info(format_args!(
            "signing UKI into {}",
            config.output_path.display()
        ));
        let pe_signer = match pe_signer {
            Some(signer) => signer,
            None => self.pe_signer(signers).stage(Stage::SignUki)?,
        };
        pe_signer
            .sign(&unsigned, &config.output_path)
            .stage(Stage::SignUki)?;

        Ok(BuildOutput {
            uki_path: config.output_path.clone(),
            signed_boot_loader_path,
            sections: sections.names(),
        })
    }

    fn pe_signer(&self, signers: &Signers) -> crate::error::Result<PeSigner> {
        PeSigner::new(
            self.toolchain.pe_signing.clone(),
            signers.secure_boot.clone(),
        )
    }
}
