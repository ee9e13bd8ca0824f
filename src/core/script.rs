//! Purpose: Project a cell's text into a standalone script file and back.
//! Exports: `ScopedScript`, `extract`, `reinsert`, `parent_dir`.
//! Role: The package manager only mutates files; this bridges cells to files.
//! Invariants: Script files live next to the notebook (relative paths resolve there).
//! Invariants: The file is removed when the `ScopedScript` drops, on every exit path.
//! Invariants: Text written and read back is trimmed of surrounding whitespace.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::core::error::{Error, io_error};
use crate::core::notebook::Cell;

const SCRIPT_PREFIX: &str = ".nbscript-";
const SCRIPT_SUFFIX: &str = ".py";

#[derive(Debug)]
pub struct ScopedScript {
    file: NamedTempFile,
}

impl ScopedScript {
    pub fn create(dir: &Path, contents: &str) -> Result<Self, Error> {
        let mut file = tempfile::Builder::new()
            .prefix(SCRIPT_PREFIX)
            .suffix(SCRIPT_SUFFIX)
            .tempfile_in(dir)
            .map_err(|err| io_error(err, "failed to create temporary script", dir))?;
        file.write_all(contents.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| io_error(err, "failed to write temporary script", file.path()))?;
        tracing::debug!(path = %file.path().display(), "created temporary script");
        Ok(Self { file })
    }

    pub fn empty(dir: &Path) -> Result<Self, Error> {
        Self::create(dir, "")
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Reads by path: the package manager may have replaced the file.
    pub fn read_trimmed(&self) -> Result<String, Error> {
        let text = fs::read_to_string(self.path())
            .map_err(|err| io_error(err, "failed to read temporary script", self.path()))?;
        Ok(text.trim().to_string())
    }
}

pub fn extract(cell: &Cell, dir: &Path) -> Result<ScopedScript, Error> {
    ScopedScript::create(dir, cell.source_text().trim())
}

pub fn reinsert(cell: &mut Cell, script: &ScopedScript) -> Result<(), Error> {
    let text = script.read_trimmed()?;
    cell.set_source(&text);
    Ok(())
}

/// Directory holding `path`; `.` for bare file names.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
