// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, trace};
use uki_builder::measure::{MeasurementEngine, SystemdMeasurer, DEFAULT_PCR};
use uki_builder::{parse_log_level, BuildLog, MeasuredSections, RsaPcrSigner, SectionName};

/// Predict the PCR values systemd-stub produces for a set of UKI sections, and optionally sign
/// the matching PCR policies.
#[derive(Parser)]
#[clap(version)]
struct Cli {
    /// Kernel image (.linux)
    #[clap(long)]
    linux: Option<PathBuf>,
    /// os-release file (.osrel)
    #[clap(long)]
    osrel: Option<PathBuf>,
    /// Kernel command line file (.cmdline)
    #[clap(long)]
    cmdline: Option<PathBuf>,
    /// Initrd (.initrd)
    #[clap(long)]
    initrd: Option<PathBuf>,
    /// Boot splash bitmap (.splash)
    #[clap(long)]
    splash: Option<PathBuf>,
    /// Kernel release file (.uname)
    #[clap(long)]
    uname: Option<PathBuf>,
    /// SBAT metadata (.sbat)
    #[clap(long)]
    sbat: Option<PathBuf>,
    /// PCR public key in PEM format (.pcrpkey)
    #[clap(long)]
    pcrpkey: Option<PathBuf>,
    /// PCR to compute the policy for
    #[clap(long, default_value_t = DEFAULT_PCR)]
    pcr: u32,
    /// RSA private key signing the PCR policies. Without it only PCR values are printed.
    #[clap(long = "private-key")]
    private_key: Option<PathBuf>,
    /// Logging level: [off, error, warn, info, debug, trace]
    #[clap(short = 'l', long = "log-level", default_value_t = String::from("info"))]
    log_level: String,
}

impl Cli {
    fn sections(&self) -> MeasuredSections {
        [
            (SectionName::Kernel, &self.linux),
            (SectionName::OsRelease, &self.osrel),
            (SectionName::Cmdline, &self.cmdline),
            (SectionName::Initrd, &self.initrd),
            (SectionName::Splash, &self.splash),
            (SectionName::Uname, &self.uname),
            (SectionName::Sbat, &self.sbat),
            (SectionName::PcrPublicKey, &self.pcrpkey),
        ]
        .into_iter()
        .filter_map(|(name, path)| path.clone().map(|p| (name, p)))
        .collect()
    }
}

fn main() -> Result<()> {
    let env = Env::default()
        .filter_or("MY_LOG_LEVEL", "info")
        .write_style_or("MY_LOG_STYLE", "always");
    env_logger::init_from_env(env);

    let cli = Cli::parse();
    let level = parse_log_level(&cli.log_level);
    log::set_max_level(level);

    let sections = cli.sections();
    if sections.is_empty() {
        bail!("no section given, pass at least one of --linux, --osrel, --cmdline, ...");
    }
    for (name, path) in &sections {
        trace!("section {} from {}", name, path.display());
    }

    let measurer = SystemdMeasurer::new();
    match &cli.private_key {
        Some(key) => {
            let signer = RsaPcrSigner::from_key_file(key)
                .with_context(|| format!("can not load PCR key {}", key.display()))?;
            measurer.print_measurements(&sections, cli.pcr, &BuildLog::global(level));
            let signature = measurer
                .generate_signed_measurement(&sections, &signer, cli.pcr)
                .map_err(|e| anyhow!("can not sign PCR policy: {}", e))?;
            info!(
                "signed {} PCR {} policies",
                signature.sha256.len(),
                cli.pcr
            );
            println!("{}", serde_json::to_string_pretty(&signature)?);
        }
        None => {
            let phases = measurer
                .measure(&sections, cli.pcr)
                .map_err(|e| anyhow!("can not measure sections: {}", e))?;
            for phase in phases {
                println!(
                    "{}: {}:sha256={}",
                    phase.phase,
                    cli.pcr,
                    hex::encode(phase.pcr_value)
                );
            }
        }
    }

    Ok(())
}
