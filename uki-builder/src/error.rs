// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

use std::fmt;
use std::io;

use thiserror::Error;

/// Error type returned by external collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = core::result::Result<T, Error>;

/// Failure kinds of a UKI build.
#[derive(Debug, Error)]
pub enum Error {
    /// Signer material is missing or unusable. Detected before any scratch state exists.
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("signing failed: {0}")]
    Signing(#[source] BoxError),
    #[error("measurement failed: {0}")]
    Measurement(#[source] BoxError),
    #[error("assembly failed: {0}")]
    Assembly(#[source] BoxError),
    #[error("invalid boot stub: {0}")]
    Stub(#[source] BoxError),
    /// A section list invariant would be broken.
    #[error("invalid section layout: {0}")]
    Layout(String),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn signing(msg: impl Into<String>) -> Self {
        Error::Signing(msg.into().into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io { .. })
    }
}

/// Pipeline step a build failure is attributed to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    ResolveSigners,
    Scratch,
    SignBootLoader,
    OsRelease,
    Cmdline,
    Initrd,
    Splash,
    Uname,
    Sbat,
    PcrPublicKey,
    Kernel,
    PcrSignature,
    Assemble,
    SignUki,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ResolveSigners => "resolve-signers",
            Stage::Scratch => "scratch",
            Stage::SignBootLoader => "sign-boot-loader",
            Stage::OsRelease => "os-release",
            Stage::Cmdline => "cmdline",
            Stage::Initrd => "initrd",
            Stage::Splash => "splash",
            Stage::Uname => "uname",
            Stage::Sbat => "sbat",
            Stage::PcrPublicKey => "pcr-public-key",
            Stage::Kernel => "kernel",
            Stage::PcrSignature => "pcr-signature",
            Stage::Assemble => "assemble",
            Stage::SignUki => "sign-uki",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal build error annotated with the stage that produced it.
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
pub struct BuildError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl BuildError {
    pub fn new(stage: Stage, source: Error) -> Self {
        BuildError { stage, source }
    }
}

/// Attach a stage to a core result.
pub(crate) trait StageContext<T> {
    fn stage(self, stage: Stage) -> core::result::Result<T, BuildError>;
}

impl<T> StageContext<T> for Result<T> {
    fn stage(self, stage: Stage) -> core::result::Result<T, BuildError> {
        self.map_err(|e| BuildError::new(stage, e))
    }
}
