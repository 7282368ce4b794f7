//! Size-based log rotation with numbered backups
//!
//! The live file is `app.log`; rotated copies are `app.log.1` (newest)
//! through `app.log.N` (oldest).

use crate::error::LogResult;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Path of backup number `index` for `base`
pub fn backup_path(base: &Path, index: u32) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Existing backups of `base`, newest first
pub fn existing_backups(base: &Path) -> Vec<PathBuf> {
    (1..)
        .map(|index| backup_path(base, index))
        .take_while(|path| path.exists())
        .collect()
}

/// Shift `base` into the backup chain.
///
/// The oldest backup is removed, `.i` becomes `.i+1` and the live file
/// becomes `.1`. Backups numbered past `backup_count` are deleted. With
/// `backup_count == 0` the live file is simply removed.
pub fn shift_backups(base: &Path, backup_count: u32) -> LogResult<()> {
    if backup_count == 0 {
        if base.exists() {
            fs::remove_file(base)?;
        }
        return Ok(());
    }

    let oldest = backup_path(base, backup_count);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    for index in (1..backup_count).rev() {
        let source = backup_path(base, index);
        if source.exists() {
            fs::rename(&source, backup_path(base, index + 1))?;
        }
    }

    if base.exists() {
        fs::rename(base, backup_path(base, 1))?;
    }

    // Left over from a run with a larger retention
    let mut stale = backup_count + 1;
    loop {
        let path = backup_path(base, stale);
        if !path.exists() {
            break;
        }
        fs::remove_file(&path)?;
        stale += 1;
    }

    Ok(())
}

/// Log file writer that tracks the live file's size
#[derive(Debug)]
pub struct LogRotator {
    /// Live log file
    base_path: PathBuf,

    /// Rotate before the file would grow past this (0 disables)
    max_size: u64,

    /// Backups to keep
    backup_count: u32,

    /// Bytes known to be in the live file
    current_size: u64,

    /// Bytes accepted by the writer but not yet flushed to the file
    pending: u64,

    /// Current file writer
    writer: Option<BufWriter<File>>,
}

impl LogRotator {
    /// Open (or create) the live file for appending
    pub fn new(path: impl Into<PathBuf>, max_size: u64, backup_count: u32) -> LogResult<Self> {
        let base_path = path.into();

        if let Some(parent) = base_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut rotator = Self {
            base_path,
            max_size,
            backup_count,
            current_size: 0,
            pending: 0,
            writer: None,
        };
        rotator.open()?;
        Ok(rotator)
    }

    fn open(&mut self) -> LogResult<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.base_path)?;
        self.current_size = file.metadata()?.len();
        self.pending = 0;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    /// Get the live file path
    pub fn current_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the file size, counting lines not yet flushed
    pub fn current_size(&self) -> u64 {
        self.current_size + self.pending
    }

    /// Whether writing `incoming` more bytes should rotate first.
    ///
    /// An empty file never rotates, so a line longer than the limit is
    /// still written whole.
    pub fn needs_rotation(&self, incoming: u64) -> bool {
        let size = self.current_size();
        self.max_size > 0 && size > 0 && size + incoming > self.max_size
    }

    /// Flush the live file, shift the backups and reopen an empty file
    pub fn rotate(&mut self) -> LogResult<()> {
        self.flush()?;
        self.writer = None;

        let shifted = shift_backups(&self.base_path, self.backup_count);
        // Reopen even when shifting failed so later lines still land somewhere
        self.open()?;
        shifted
    }

    /// Buffer `line` and a newline, returning the bytes accepted.
    ///
    /// Nothing counts as written until [`flush`](Self::flush) succeeds. A
    /// failed write discards every unflushed line, this one included.
    pub fn write_line(&mut self, line: &str) -> LogResult<u64> {
        if self.writer.is_none() {
            self.open()?;
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(0);
        };

        let result = writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(err) = result {
            self.discard();
            return Err(err.into());
        }

        let written = line.len() as u64 + 1;
        self.pending += written;
        Ok(written)
    }

    /// Push buffered lines into the file, returning the bytes that reached it.
    ///
    /// On failure the unflushed bytes are discarded, so a later flush or
    /// drop cannot write a partial batch behind the caller's back.
    pub fn flush(&mut self) -> LogResult<u64> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(0);
        };
        match writer.flush() {
            Ok(()) => {
                let flushed = self.pending;
                self.current_size += flushed;
                self.pending = 0;
                Ok(flushed)
            },
            Err(err) => {
                self.discard();
                Err(err.into())
            },
        }
    }

    /// Drop unflushed bytes and resync the size with the file
    fn discard(&mut self) {
        self.pending = 0;
        if let Some(writer) = self.writer.take() {
            let (file, _lost) = writer.into_parts();
            if let Ok(metadata) = file.metadata() {
                self.current_size = metadata.len();
            }
            self.writer = Some(BufWriter::new(file));
        }
    }

    /// Sync flushed bytes to disk
    pub fn sync_data(&self) -> LogResult<()> {
        if let Some(writer) = &self.writer {
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Flush and sync, returning the bytes flushed
    pub fn sync(&mut self) -> LogResult<u64> {
        let flushed = self.flush()?;
        self.sync_data()?;
        Ok(flushed)
    }

    /// Sync and release the file handle
    pub fn close(&mut self) -> LogResult<()> {
        let synced = self.sync();
        self.writer = None;
        synced.map(|_| ())
    }
}
