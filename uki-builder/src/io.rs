// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::ops::RangeInclusive;
use std::path::Path;

use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Upper bound for any single input artifact (kernel, initrd, stub).
pub const MAX_INPUT_SIZE: u64 = 2 * 1024 * 1024 * 1024;
/// Upper bound for key and certificate files.
pub const MAX_KEY_SIZE: u64 = 1024 * 1024;

/// Whole content of an input file whose size was checked against a range.
///
/// I/O failures are returned, not logged: the caller owns the build log.
pub struct InputData {
    data: Vec<u8>,
}

impl InputData {
    pub fn new(path: &Path, range: RangeInclusive<u64>, desc: &str) -> Result<Self> {
        let ctx = || format!("can not read {} {}", desc, path.display());
        // Check file size first to avoid allocating too much memory.
        let md = fs::metadata(path).map_err(|e| Error::io(ctx(), e))?;
        if md.len() > *range.end() {
            return Err(invalid_size(path, md.len(), &range, desc));
        }

        let data = fs::read(path).map_err(|e| Error::io(ctx(), e))?;
        if !range.contains(&(data.len() as u64)) {
            return Err(invalid_size(path, data.len() as u64, &range, desc));
        }

        Ok(InputData { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Wipe the buffer, used for private key material.
    pub fn clear(&mut self) {
        self.data.zeroize();
    }
}

// The buffer may hold private key material, only its size is shown.
impl fmt::Debug for InputData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputData")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

fn invalid_size(path: &Path, len: u64, range: &RangeInclusive<u64>, desc: &str) -> Error {
    Error::io(
        format!("can not read {} {}", desc, path.display()),
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "size {} is invalid, should be {}-{}",
                len,
                range.start(),
                range.end()
            ),
        ),
    )
}

/// Read at most `limit` bytes from the start of a file.
pub fn read_head(path: &Path, limit: u64) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buf = Vec::new();
    file.take(limit).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Create a new file only the current user can read, and fill it.
pub fn write_scratch_file(path: &Path, data: &[u8], desc: &str) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options
        .open(path)
        .and_then(|mut file| file.write_all(data))
        .map_err(|e| Error::io(format!("can not write {} {}", desc, path.display()), e))
}

/// Replace `path` with `data` in one rename. The target is left alone if anything fails.
pub fn write_atomic(path: &Path, data: &[u8], desc: &str) -> Result<()> {
    let ctx = || format!("can not write {} {}", desc, path.display());
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".ukify-out")
        .tempfile_in(dir)
        .map_err(|e| Error::io(ctx(), e))?;
    tmp.write_all(data)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::io(ctx(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .map_err(|e| Error::io(ctx(), e))?;
    }

    tmp.persist(path).map_err(|e| Error::io(ctx(), e.error))?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_input_data_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, [0x5au8; 16]).unwrap();

        let input = InputData::new(&path, 0..=16, "blob").unwrap();
        assert_eq!(input.as_bytes(), &[0x5au8; 16]);

        let err = InputData::new(&path, 0..=15, "blob").unwrap_err();
        assert!(err.is_io());
        assert!(err.to_string().contains("size 16 is invalid"));
        assert!(InputData::new(&path, 17..=32, "blob").unwrap_err().is_io());
        assert!(InputData::new(&dir.path().join("missing"), 0..=16, "blob")
            .unwrap_err()
            .is_io());
    }

    #[test]
    fn test_input_data_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        fs::write(&path, b"secret").unwrap();

        let mut input = InputData::new(&path, 0..=MAX_KEY_SIZE, "key").unwrap();
        assert_eq!(format!("{:?}", input), "InputData { len: 6, .. }");
        input.clear();
        assert!(input.as_bytes().is_empty());
    }

    #[test]
    fn test_read_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image");
        fs::write(&path, vec![1u8; 100]).unwrap();

        assert_eq!(read_head(&path, 10).unwrap().len(), 10);
        assert_eq!(read_head(&path, 1000).unwrap().len(), 100);
    }

    #[test]
    fn test_write_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmdline");

        write_scratch_file(&path, b"console=ttyS0", "cmdline").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"console=ttyS0");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        // Scratch files are never overwritten.
        assert!(write_scratch_file(&path, b"other", "cmdline").is_err());
    }

    #[test]
    fn test_write_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uki.efi");

        write_atomic(&path, b"first", "uki").unwrap();
        write_atomic(&path, b"second", "uki").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        let bad = dir.path().join("missing").join("uki.efi");
        assert!(write_atomic(&bad, b"data", "uki").unwrap_err().is_io());
        assert!(!bad.exists());
    }
}
