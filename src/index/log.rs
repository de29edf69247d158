//! The logical log: durable command storage for crash recovery.
//!
//! Commands buffered by a transaction are appended here at prepare time and
//! replayed at data-source startup. Replay stops at the first truncated or
//! corrupt record, so a log that was mid-write when the process died
//! recovers everything up to the truncation point.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::Result;

use super::command::IndexCommand;

/// An append-only command log.
#[derive(Debug)]
pub struct LogicalLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogicalLog {
    /// Open (and create if missing) the log at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(LogicalLog {
            path,
            file: Mutex::new(file),
        })
    }

    /// The path of the active log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one command.
    pub fn append(&self, command: &IndexCommand) -> Result<()> {
        let mut file = self.file.lock();
        let mut writer = BufWriter::new(&mut *file);
        command.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Force appended commands to durable storage.
    pub fn flush(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    /// Read every fully persisted command from the start of the log.
    pub fn replay(&self) -> Result<Vec<IndexCommand>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let mut commands = Vec::new();
        while let Some(command) = IndexCommand::read_from(&mut reader)? {
            commands.push(command);
        }
        Ok(commands)
    }

    /// Retire the current log contents after their commands were applied.
    ///
    /// With `keep` set the file is archived under a versioned name and a
    /// fresh log is started; otherwise the log is truncated in place.
    pub fn retire(&self, version: u64, keep: bool) -> Result<()> {
        let mut file = self.file.lock();
        if keep {
            let mut archived = self.path.as_os_str().to_owned();
            archived.push(format!(".v{version}"));
            fs::rename(&self.path, PathBuf::from(archived))?;
            *file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
        } else {
            file.set_len(0)?;
            file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::identifier::{EntityKind, IndexIdentifier};

    fn command(entity_id: i64) -> IndexCommand {
        IndexCommand::add(
            IndexIdentifier::new(EntityKind::Node, "people"),
            entity_id,
            "name",
            "alice",
        )
    }

    #[test]
    fn test_append_and_replay() {
        let tmp = tempfile::tempdir().unwrap();
        let log = LogicalLog::open(tmp.path().join("lucene.log")).unwrap();

        log.append(&command(1)).unwrap();
        log.append(&command(2)).unwrap();
        log.flush().unwrap();

        assert_eq!(log.replay().unwrap(), vec![command(1), command(2)]);
    }

    #[test]
    fn test_replay_stops_at_truncation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("lucene.log");
        let log = LogicalLog::open(&path).unwrap();
        log.append(&command(1)).unwrap();
        log.append(&command(2)).unwrap();
        log.flush().unwrap();

        // Cut the second record short.
        let full = fs::read(&path).unwrap();
        fs::write(&path, &full[..full.len() - 3]).unwrap();

        assert_eq!(log.replay().unwrap(), vec![command(1)]);
    }

    #[test]
    fn test_retire_truncates() {
        let tmp = tempfile::tempdir().unwrap();
        let log = LogicalLog::open(tmp.path().join("lucene.log")).unwrap();
        log.append(&command(1)).unwrap();

        log.retire(0, false).unwrap();
        assert!(log.replay().unwrap().is_empty());

        // The log is still usable after retiring.
        log.append(&command(3)).unwrap();
        assert_eq!(log.replay().unwrap(), vec![command(3)]);
    }

    #[test]
    fn test_retire_keeps_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("lucene.log");
        let log = LogicalLog::open(&path).unwrap();
        log.append(&command(1)).unwrap();

        log.retire(4, true).unwrap();
        assert!(log.replay().unwrap().is_empty());
        assert!(tmp.path().join("lucene.log.v4").exists());
    }
}
