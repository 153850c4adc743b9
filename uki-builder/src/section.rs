// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Sections a UKI is built from.
///
/// Variants are declared in the order systemd measures them into PCR 11, so the derived `Ord`
/// is the canonical measurement order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SectionName {
    Kernel,
    OsRelease,
    Cmdline,
    Initrd,
    Splash,
    Uname,
    Sbat,
    PcrPublicKey,
    PcrSignature,
}

impl SectionName {
    pub const ALL: [SectionName; 9] = [
        SectionName::Kernel,
        SectionName::OsRelease,
        SectionName::Cmdline,
        SectionName::Initrd,
        SectionName::Splash,
        SectionName::Uname,
        SectionName::Sbat,
        SectionName::PcrPublicKey,
        SectionName::PcrSignature,
    ];

    /// Name of the PE section carrying this content.
    pub fn pe_name(&self) -> &'static str {
        match self {
            SectionName::Kernel => ".linux",
            SectionName::OsRelease => ".osrel",
            SectionName::Cmdline => ".cmdline",
            SectionName::Initrd => ".initrd",
            SectionName::Splash => ".splash",
            SectionName::Uname => ".uname",
            SectionName::Sbat => ".sbat",
            SectionName::PcrPublicKey => ".pcrpkey",
            SectionName::PcrSignature => ".pcrsig",
        }
    }

    pub fn from_pe_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.pe_name() == name)
    }

    /// Whether the section goes into the PCR measurement. The signature over the measurement
    /// can not measure itself.
    pub fn is_measured(&self) -> bool {
        *self != SectionName::PcrSignature
    }

    /// Whether the section is copied into the assembled image. `.sbat` already lives in the
    /// boot stub.
    pub fn is_appended(&self) -> bool {
        *self != SectionName::Sbat
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pe_name())
    }
}

/// A named blob backed by a file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Section {
    pub name: SectionName,
    pub path: PathBuf,
    pub measure: bool,
    pub append: bool,
}

impl Section {
    /// Section with the flags its name calls for.
    pub fn new(name: SectionName, path: impl Into<PathBuf>) -> Self {
        Section {
            name,
            path: path.into(),
            measure: name.is_measured(),
            append: name.is_appended(),
        }
    }
}

/// Measured sections keyed by name. Iteration follows the measurement order.
pub type MeasuredSections = BTreeMap<SectionName, PathBuf>;

/// Append-only, ordered list of the sections of one build.
#[derive(Clone, Debug, Default)]
pub struct SectionList {
    sections: Vec<Section>,
}

impl SectionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, section: Section) -> Result<()> {
        let name = section.name;
        if self.contains(name) {
            return Err(Error::Layout(format!("duplicate section {}", name)));
        }
        if section.measure && !name.is_measured() {
            return Err(Error::Layout(format!("section {} can not be measured", name)));
        }
        if section.append && !name.is_appended() {
            return Err(Error::Layout(format!("section {} can not be appended", name)));
        }
        if self.contains(SectionName::PcrSignature) {
            return Err(Error::Layout(format!(
                "section {} after {}",
                name,
                SectionName::PcrSignature
            )));
        }

        let last = self.sections.last().map(|s| s.name);
        if name == SectionName::PcrSignature {
            if last != Some(SectionName::Kernel) {
                return Err(Error::Layout(format!(
                    "{} must directly follow {}",
                    name,
                    SectionName::Kernel
                )));
            }
        } else if self.contains(SectionName::Kernel) {
            return Err(Error::Layout(format!(
                "section {} after {}",
                name,
                SectionName::Kernel
            )));
        }

        self.sections.push(section);
        Ok(())
    }

    /// Check the list is ready for assembly: it ends with the kernel and its signed policy.
    pub fn check_complete(&self) -> Result<()> {
        let tail: Vec<SectionName> = self.sections.iter().rev().take(2).map(|s| s.name).collect();
        if tail != [SectionName::PcrSignature, SectionName::Kernel] {
            return Err(Error::Layout(format!(
                "section list must end with {} followed by {}",
                SectionName::Kernel,
                SectionName::PcrSignature
            )));
        }
        Ok(())
    }

    pub fn contains(&self, name: SectionName) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: SectionName) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn measured(&self) -> MeasuredSections {
        self.sections
            .iter()
            .filter(|s| s.measure)
            .map(|s| (s.name, s.path.clone()))
            .collect()
    }

    /// Sections to copy into the image, in list order.
    pub fn appended(&self) -> Vec<&Section> {
        self.sections.iter().filter(|s| s.append).collect()
    }

    pub fn names(&self) -> Vec<SectionName> {
        self.sections.iter().map(|s| s.name).collect()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}
