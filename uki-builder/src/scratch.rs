// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

use std::io;
use std::path::Path;

use tempfile::TempDir;

use crate::error::{Error, Result};

const SCRATCH_PREFIX: &str = "ukify";

/// Build-exclusive temporary directory.
///
/// `close` removes the directory and reports the outcome. A handle dropped without `close`
/// still tries to remove it, silently.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a uniquely named directory under `root`, or under the system temp dir.
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| Error::io("create scratch directory", e))?;

        Ok(ScratchDir { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}
