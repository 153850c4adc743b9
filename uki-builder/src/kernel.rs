// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

use std::path::Path;

use scroll::{Pread, LE};

use crate::error::BoxError;
use crate::io::read_head;

/// Recovers the kernel release string from a kernel image.
pub trait KernelVersionProber: Send + Sync {
    fn discover_version(&self, kernel: &Path) -> core::result::Result<String, BoxError>;
}

// x86 boot protocol, Documentation/arch/x86/boot.rst
const SETUP_HEADER_MAGIC_OFFSET: usize = 0x202;
const SETUP_HEADER_MAGIC: &[u8; 4] = b"HdrS";
const KERNEL_VERSION_OFFSET: usize = 0x20e;
// `kernel_version` is relative to the end of the first sector.
const KERNEL_VERSION_BASE: usize = 0x200;
const MAX_HEADER_SIZE: u64 = 64 * 1024;

/// Reads the version string referenced by the bzImage setup header.
#[derive(Clone, Copy, Debug, Default)]
pub struct BzImageProber;

impl BzImageProber {
    pub fn new() -> Self {
        BzImageProber
    }

    /// Release from the first bytes of a bzImage, e.g. `6.1.0-13-amd64`.
    pub fn parse_version(image: &[u8]) -> core::result::Result<String, BoxError> {
        let magic = image
            .get(SETUP_HEADER_MAGIC_OFFSET..SETUP_HEADER_MAGIC_OFFSET + SETUP_HEADER_MAGIC.len())
            .ok_or("kernel image too small for a setup header")?;
        if magic != SETUP_HEADER_MAGIC {
            return Err("not a bzImage: setup header magic not found".into());
        }

        let offset: u16 = image.pread_with(KERNEL_VERSION_OFFSET, LE)?;
        if offset == 0 {
            return Err("kernel image carries no version string".into());
        }

        let start = offset as usize + KERNEL_VERSION_BASE;
        let tail = image
            .get(start..)
            .ok_or("kernel version string out of bounds")?;
        let end = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or("kernel version string is not terminated")?;
        let version = std::str::from_utf8(&tail[..end])?;

        Ok(version
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string())
    }
}

impl KernelVersionProber for BzImageProber {
    fn discover_version(&self, kernel: &Path) -> core::result::Result<String, BoxError> {
        let head = read_head(kernel, MAX_HEADER_SIZE)?;
        Self::parse_version(&head)
    }
}
