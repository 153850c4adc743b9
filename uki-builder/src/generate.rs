// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

//! Section generators.
//!
//! Each generator produces at most one section from the build inputs and the sections
//! generated before it. `SECTION_STAGES` fixes their order: the kernel comes after every other
//! measured section and the signed policy over all of them comes last.

use std::fs;
use std::path::Path;

use crate::builder::Toolchain;
use crate::config::BuildConfig;
use crate::error::{Error, Result, Stage};
use crate::io::write_scratch_file;
use crate::logger::BuildLog;
use crate::public_key;
use crate::scratch::ScratchDir;
use crate::section::{Section, SectionList, SectionName};
use crate::signer::Signers;

/// Bitmap shown while booting when no splash is configured.
pub const DEFAULT_SPLASH: &[u8] = include_bytes!("../assets/splash.bmp");

const UNKNOWN_KERNEL_VERSION: &str = "unknown";

/// Everything a generator may read.
pub(crate) struct GenerateContext<'a> {
    pub config: &'a BuildConfig,
    pub signers: &'a Signers,
    pub toolchain: &'a Toolchain,
    pub scratch: &'a ScratchDir,
    pub log: &'a BuildLog,
}

pub(crate) type GenerateFn = fn(&GenerateContext<'_>, &SectionList) -> Result<Option<Section>>;

pub(crate) struct StageDescriptor {
    pub stage: Stage,
    pub generate: GenerateFn,
}

pub(crate) const SECTION_STAGES: [StageDescriptor; 9] = [
    StageDescriptor {
        stage: Stage::OsRelease,
        generate: generate_os_release,
    },
    StageDescriptor {
        stage: Stage::Cmdline,
        generate: generate_cmdline,
    },
    StageDescriptor {
        stage: Stage::Initrd,
        generate: generate_initrd,
    },
    StageDescriptor {
        stage: Stage::Splash,
        generate: generate_splash,
    },
    StageDescriptor {
        stage: Stage::Uname,
        generate: generate_uname,
    },
    StageDescriptor {
        stage: Stage::Sbat,
        generate: generate_sbat,
    },
    StageDescriptor {
        stage: Stage::PcrPublicKey,
        generate: generate_pcr_public_key,
    },
    StageDescriptor {
        stage: Stage::Kernel,
        generate: generate_kernel,
    },
    StageDescriptor {
        stage: Stage::PcrSignature,
        generate: generate_pcr_signature,
    },
];

fn check_input(path: &Path, desc: &str) -> Result<()> {
    let md = fs::metadata(path)
        .map_err(|e| Error::io(format!("{} {}", desc, path.display()), e))?;
    if !md.is_file() {
        return Err(Error::io(
            format!("{} {}", desc, path.display()),
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    Ok(())
}

fn generate_os_release(ctx: &GenerateContext<'_>, _: &SectionList) -> Result<Option<Section>> {
    let path = match &ctx.config.os_release_path {
        Some(path) => {
            ctx.log.debug(format_args!("using os-release {}", path.display()));
            check_input(path, "os-release")?;
            path.clone()
        }
        None => {
            ctx.log.debug(format_args!("generating os-release"));
            let path = ctx.scratch.join("os-release");
            write_scratch_file(&path, ctx.config.os_release().as_bytes(), "os-release")?;
            path
        }
    };
    Ok(Some(Section::new(SectionName::OsRelease, path)))
}

fn generate_cmdline(ctx: &GenerateContext<'_>, _: &SectionList) -> Result<Option<Section>> {
    ctx.log.debug(format_args!("using cmdline \"{}\"", ctx.config.cmdline));
    let path = ctx.scratch.join("cmdline");
    write_scratch_file(&path, ctx.config.cmdline.as_bytes(), "cmdline")?;
    Ok(Some(Section::new(SectionName::Cmdline, path)))
}

fn generate_initrd(ctx: &GenerateContext<'_>, _: &SectionList) -> Result<Option<Section>> {
    let path = &ctx.config.initrd_path;
    ctx.log.debug(format_args!("using initrd {}", path.display()));
    check_input(path, "initrd")?;
    Ok(Some(Section::new(SectionName::Initrd, path.clone())))
}

fn generate_splash(ctx: &GenerateContext<'_>, _: &SectionList) -> Result<Option<Section>> {
    let data = match &ctx.config.splash_path {
        Some(path) => {
            ctx.log.debug(format_args!("using splash {}", path.display()));
            fs::read(path).map_err(|e| {
                ctx.log.error(format_args!(
                    "can not read splash {}: {}",
                    path.display(),
                    e
                ));
                Error::io(format!("read splash {}", path.display()), e)
            })?
        }
        None => {
            ctx.log.debug(format_args!("using bundled splash"));
            DEFAULT_SPLASH.to_vec()
        }
    };

    let path = ctx.scratch.join("splash.bmp");
    write_scratch_file(&path, &data, "splash")?;
    Ok(Some(Section::new(SectionName::Splash, path)))
}

fn generate_uname(ctx: &GenerateContext<'_>, _: &SectionList) -> Result<Option<Section>> {
    let kernel = &ctx.config.kernel_path;
    let version = match ctx.toolchain.kernel_prober.discover_version(kernel) {
        Ok(v) if !v.is_empty() && v != UNKNOWN_KERNEL_VERSION => v,
        Ok(v) => {
            ctx.log.warn(format_args!(
                "kernel version of {} is \"{}\", skipping uname section",
                kernel.display(),
                v
            ));
            return Ok(None);
        }
        Err(e) => {
            ctx.log.warn(format_args!(
                "can not infer kernel version of {}, skipping uname section: {}",
                kernel.display(),
                e
            ));
            return Ok(None);
        }
    };

    ctx.log.debug(format_args!("kernel version {}", version));
    let path = ctx.scratch.join("uname");
    write_scratch_file(&path, version.as_bytes(), "uname")?;
    Ok(Some(Section::new(SectionName::Uname, path)))
}

fn generate_sbat(ctx: &GenerateContext<'_>, _: &SectionList) -> Result<Option<Section>> {
    let stub = &ctx.config.stub_path;
    ctx.log.debug(format_args!("reading SBAT from {}", stub.display()));
    let sbat = ctx
        .toolchain
        .stub_reader
        .read_sbat(stub)
        .map_err(Error::Stub)?;

    // Measured only: the boot stub already carries the .sbat section.
    let path = ctx.scratch.join("sbat");
    write_scratch_file(&path, &sbat, "sbat")?;
    Ok(Some(Section::new(SectionName::Sbat, path)))
}

fn generate_pcr_public_key(
    ctx: &GenerateContext<'_>,
    _: &SectionList,
) -> Result<Option<Section>> {
    ctx.log.debug(format_args!("exporting PCR public key"));
    let der = ctx
        .signers
        .pcr
        .public_key_der()
        .map_err(Error::Signing)?;
    let pem = public_key::spki_to_pem(&der).map_err(Error::signing)?;

    let path = ctx.scratch.join("pcr-public.pem");
    write_scratch_file(&path, pem.as_bytes(), "PCR public key")?;
    Ok(Some(Section::new(SectionName::PcrPublicKey, path)))
}

fn generate_kernel(ctx: &GenerateContext<'_>, _: &SectionList) -> Result<Option<Section>> {
    let path = &ctx.config.kernel_path;
    ctx.log.debug(format_args!("using kernel {}", path.display()));
    check_input(path, "kernel")?;
    Ok(Some(Section::new(SectionName::Kernel, path.clone())))
}

fn generate_pcr_signature(
    ctx: &GenerateContext<'_>,
    sections: &SectionList,
) -> Result<Option<Section>> {
    let pcr = ctx.config.pcr;
    ctx.log.info(format_args!(
        "generating PCR {} measurements and signed policy",
        pcr
    ));

    let measured = sections.measured();
    let engine = &ctx.toolchain.measurement;
    let signature = engine
        .generate_signed_measurement(&measured, ctx.signers.pcr.as_ref(), pcr)
        .map_err(Error::Measurement)?;
    if ctx.log.enabled(log::Level::Debug) {
        engine.print_measurements(&measured, pcr, ctx.log);
    }

    let data = serde_json::to_vec(&signature).map_err(|e| Error::Measurement(e.into()))?;
    let path = ctx.scratch.join("pcrpsig");
    write_scratch_file(&path, &data, "PCR signature")?;
    Ok(Some(Section::new(SectionName::PcrSignature, path)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stage_order() {
        let stages: Vec<Stage> = SECTION_STAGES.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::OsRelease,
                Stage::Cmdline,
                Stage::Initrd,
                Stage::Splash,
                Stage::Uname,
                Stage::Sbat,
                Stage::PcrPublicKey,
                Stage::Kernel,
                Stage::PcrSignature,
            ]
        );
        // The signed policy directly follows the kernel and ends the list.
        let kernel = stages.iter().position(|s| *s == Stage::Kernel).unwrap();
        assert_eq!(stages[kernel + 1], Stage::PcrSignature);
        assert_eq!(kernel + 2, stages.len());
    }

    #[test]
    fn test_default_splash() {
        assert!(DEFAULT_SPLASH.starts_with(b"BM"));
    }
}
