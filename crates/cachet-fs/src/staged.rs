use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Result, remove_file_if_exists};

const NAME_ATTEMPTS: u64 = 64;

/// A file written under `<target>.<millis>` and moved onto `target` on commit.
///
/// Exactly one of [`commit`](Self::commit) and [`abort`](Self::abort) can run,
/// since both consume the value. If neither runs the staged file is deleted on
/// drop and the target is left as it was.
pub struct StagedFile {
    target:   PathBuf,
    staging:  PathBuf,
    file:     Option<BufWriter<File>>,
    written:  u64,
    finished: bool,
}

impl StagedFile {
    /// Open a fresh staging file beside `target`.
    ///
    /// The staging name is the target's file name plus `.` and the current
    /// time in milliseconds. A name already taken by a concurrent writer is
    /// skipped by bumping the stamp.
    pub fn create(target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let file_name = target
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| Error::NoParent(target.clone()))?;

        let stamp = now_millis();
        for offset in 0..NAME_ATTEMPTS {
            let staging = target.with_file_name(staging_name(&file_name, stamp + offset));
            match OpenOptions::new().write(true).create_new(true).open(&staging) {
                Ok(file) => {
                    return Ok(Self {
                        target,
                        staging,
                        file: Some(BufWriter::new(file)),
                        written: 0,
                        finished: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(Error::Write {
                        path:   staging,
                        source: e,
                    });
                }
            }
        }

        Err(Error::Write {
            path:   target,
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free staging name"),
        })
    }

    pub fn target_path(&self) -> &Path { &self.target }

    pub fn staging_path(&self) -> &Path { &self.staging }

    /// Bytes written so far.
    pub fn len(&self) -> u64 { self.written }

    pub fn is_empty(&self) -> bool { self.written == 0 }

    /// Flush, close and swap the staged file onto the target.
    ///
    /// An existing target is deleted first. If the staging path still exists
    /// after the rename the swap is reported as failed.
    pub fn commit(mut self) -> Result<()> {
        self.close()?;

        if self.target.is_file() {
            fs::remove_file(&self.target).map_err(|e| Error::Remove {
                path:   self.target.clone(),
                source: e,
            })?;
        }

        fs::rename(&self.staging, &self.target).map_err(|e| Error::Write {
            path:   self.target.clone(),
            source: e,
        })?;

        if self.staging.exists() {
            return Err(Error::SwapFailed {
                staging: self.staging.clone(),
                target:  self.target.clone(),
            });
        }

        self.finished = true;
        Ok(())
    }

    /// Close and delete the staged file. The target is never touched.
    pub fn abort(mut self) -> Result<()> {
        self.file.take();
        self.finished = true;
        remove_file_if_exists(&self.staging).map(|_| ())
    }

    fn close(&mut self) -> Result<()> {
        let Some(writer) = self.file.take() else {
            return Ok(());
        };
        let file = writer.into_inner().map_err(|e| Error::Write {
            path:   self.staging.clone(),
            source: e.into_error(),
        })?;
        file.sync_all().map_err(|e| Error::Write {
            path:   self.staging.clone(),
            source: e,
        })
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("staged file already closed"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.finished {
            self.file.take();
            let _ = fs::remove_file(&self.staging);
        }
    }
}

fn staging_name(file_name: &OsString, stamp: u64) -> OsString {
    let mut name = file_name.clone();
    name.push(format!(".{stamp}"));
    name
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
