// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

//! Read-only access to sections of the UEFI boot stub.
//!
//! Only the COFF section table is walked. For the file format, refer to
//! [PE Format](https://learn.microsoft.com/en-us/windows/win32/debug/pe-format).

use std::path::Path;

use scroll::{Pread, LE};

use crate::error::BoxError;
use crate::io::{InputData, MAX_INPUT_SIZE};

/// Reads the SBAT metadata embedded in a boot stub.
pub trait SbatReader: Send + Sync {
    fn read_sbat(&self, stub: &Path) -> core::result::Result<Vec<u8>, BoxError>;
}

const DOS_SIGNATURE: u16 = 0x5a4d;
const PE_SIGNATURE: u32 = 0x0000_4550;
const PE_POINTER_OFFSET: usize = 0x3c;
// Signature(4) + COFF file header(20)
const COFF_HEADER_SIZE: usize = 24;
const NUMBER_OF_SECTIONS_OFFSET: usize = 6;
const SIZE_OF_OPTIONAL_HEADER_OFFSET: usize = 20;
const COFF_SECTION_SIZE: usize = 40;

pub const SBAT_SECTION_NAME: &str = ".sbat";

#[derive(Copy, Clone, Debug, Default, Pread)]
pub struct SectionHeader {
    name: [u8; 8],
    virtual_size: u32,
    virtual_address: u32,
    size_of_raw_data: u32,
    pointer_to_raw_data: u32,
    pointer_to_relocations: u32,
    pointer_to_line_numbers: u32,
    number_of_relocations: u16,
    number_of_line_numbers: u16,
    characteristics: u32,
}

impl SectionHeader {
    /// Section name without the NUL padding.
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|c| *c == 0).unwrap_or(8);
        &self.name[..len]
    }

    /// File range holding the section content. Virtual padding is not part of it.
    pub fn file_range(&self) -> core::ops::Range<usize> {
        let start = self.pointer_to_raw_data as usize;
        let size = self.virtual_size.min(self.size_of_raw_data) as usize;
        start..start + size
    }
}

/// Iterator over the COFF section table.
pub struct SectionHeaders<'a> {
    index: usize,
    entries: &'a [u8],
    num_sections: usize,
}

impl<'a> SectionHeaders<'a> {
    pub fn parse(pe_image: &'a [u8]) -> core::result::Result<Self, BoxError> {
        if pe_image.pread_with::<u16>(0, LE)? != DOS_SIGNATURE {
            return Err("missing MZ signature".into());
        }
        let pe_offset = pe_image.pread_with::<u32>(PE_POINTER_OFFSET, LE)? as usize;
        if pe_image.pread_with::<u32>(pe_offset, LE)? != PE_SIGNATURE {
            return Err("missing PE signature".into());
        }

        let num_sections =
            pe_image.pread_with::<u16>(pe_offset + NUMBER_OF_SECTIONS_OFFSET, LE)? as usize;
        let optional_size =
            pe_image.pread_with::<u16>(pe_offset + SIZE_OF_OPTIONAL_HEADER_OFFSET, LE)? as usize;
        let table = pe_offset + COFF_HEADER_SIZE + optional_size;
        let end = table + num_sections * COFF_SECTION_SIZE;
        let entries = pe_image
            .get(table..end)
            .ok_or("section table out of bounds")?;

        Ok(SectionHeaders {
            index: 0,
            entries,
            num_sections,
        })
    }
}

impl<'a> Iterator for SectionHeaders<'a> {
    type Item = SectionHeader;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.num_sections {
            return None;
        }

        let offset = self.index * COFF_SECTION_SIZE;
        let section: SectionHeader = self.entries.pread_with(offset, LE).ok()?;
        self.index += 1;
        Some(section)
    }
}

/// Content of the section called `name`, as stored in the file.
pub fn find_section<'a>(
    pe_image: &'a [u8],
    name: &str,
) -> core::result::Result<&'a [u8], BoxError> {
    let section = SectionHeaders::parse(pe_image)?
        .find(|s| s.name() == name.as_bytes())
        .ok_or_else(|| format!("no {} section", name))?;
    pe_image
        .get(section.file_range())
        .ok_or_else(|| format!("{} section out of bounds", name).into())
}

/// SBAT reader for PE/COFF boot stubs such as systemd-stub.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeStubReader;

impl PeStubReader {
    pub fn new() -> Self {
        PeStubReader
    }
}

impl SbatReader for PeStubReader {
    fn read_sbat(&self, stub: &Path) -> core::result::Result<Vec<u8>, BoxError> {
        let image = InputData::new(stub, 1..=MAX_INPUT_SIZE, "boot stub")?;
        let sbat = find_section(image.as_bytes(), SBAT_SECTION_NAME)
            .map_err(|e| format!("can not read SBAT from {}: {}", stub.display(), e))?;
        Ok(sbat.to_vec())
    }
}
