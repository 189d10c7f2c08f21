//! Placeholder modules for stubbed-out local `replace` targets.
//!
//! The toolchain refuses to resolve a `replace` pointing at a directory that
//! is missing or has no module file. Each stub directory gets an empty
//! `go.mod` and a one-line source file so resolution can proceed even when
//! the real local module is unavailable.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::GO_MOD;

/// Placeholder source file written into each stub.
pub const STUB_SOURCE: &str = "main.go";

/// Module file written into each stub.
pub const STUB_MANIFEST: &str = GO_MOD;

const STUB_SOURCE_BODY: &str = "package dummypkg\n";

/// Create a stub module under `root` for every stub id.
///
/// Idempotent. Existing files are never truncated or rewritten, so a real
/// module that happens to live at a stub path is left intact.
pub fn materialize<'a>(root: &Path, stub_ids: impl IntoIterator<Item = &'a str>) -> io::Result<()> {
    for id in stub_ids {
        let dir = root.join(id);
        fs::create_dir_all(&dir)?;
        create_if_absent(&dir.join(STUB_MANIFEST), b"")?;
        create_if_absent(&dir.join(STUB_SOURCE), STUB_SOURCE_BODY.as_bytes())?;
        tracing::debug!(stub = %dir.display(), "materialized stub module");
    }
    Ok(())
}

fn create_if_absent(path: &Path, body: &[u8]) -> io::Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => file.write_all(body),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}
