// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

use std::path::{Path, PathBuf};

use crate::error::BoxError;
use crate::section::Section;

/// Combines a boot stub with sections into one unsigned PE image.
///
/// Every section passed in must become a PE section named after `Section::name`, in the given
/// order. The image is written below `scratch_dir` and its path returned.
pub trait Assembler: Send + Sync {
    fn assemble(
        &self,
        stub: &Path,
        sections: &[&Section],
        scratch_dir: &Path,
    ) -> core::result::Result<PathBuf, BoxError>;
}
