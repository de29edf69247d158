//! The index store file: per-data-source metadata and index configuration.
//!
//! A small binary file holds the store's creation time, a random instance
//! identifier, the current log version, and the persisted configuration of
//! every index. The layout is a fixed 24-byte header followed by
//! length-prefixed entries:
//!
//! ```text
//! [creationTime:8][randomIdentifier:8][version:8]
//! ([name][propertyCount:4]([key][value])*)*
//! ```
//!
//! Strings are a 4-byte big-endian byte length followed by UTF-16BE code
//! units. A truncated tail is tolerated on read; configuration entries after
//! the truncation point are simply absent.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;

use crate::error::{MuninnError, Result};

const HEADER_SIZE: usize = 24;

#[derive(Debug)]
struct StoreState {
    version: u64,
    index_config: HashMap<String, HashMap<String, String>>,
}

/// The metadata store backing one data source.
#[derive(Debug)]
pub struct IndexStore {
    path: PathBuf,
    creation_time: i64,
    random_identifier: i64,
    state: Mutex<StoreState>,
}

impl IndexStore {
    /// Open the store file, creating it on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            Self::create(&path)?;
        }

        let bytes = fs::read(&path)?;
        if bytes.len() < HEADER_SIZE {
            return Err(MuninnError::storage(format!(
                "expected at least {HEADER_SIZE} bytes in {}",
                path.display()
            )));
        }
        let mut cursor = Cursor::new(&bytes);
        let creation_time = cursor.read_i64::<BigEndian>()?;
        let random_identifier = cursor.read_i64::<BigEndian>()?;
        let version = cursor.read_u64::<BigEndian>()?;
        let index_config = read_index_config(&mut cursor);

        Ok(IndexStore {
            path,
            creation_time,
            random_identifier,
            state: Mutex::new(StoreState {
                version,
                index_config,
            }),
        })
    }

    fn create(path: &Path) -> Result<()> {
        let creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let random_identifier: i64 = rand::random();

        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        bytes.write_i64::<BigEndian>(creation_time)?;
        bytes.write_i64::<BigEndian>(random_identifier)?;
        bytes.write_u64::<BigEndian>(0)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Creation time of this store, milliseconds since the epoch.
    pub fn creation_time(&self) -> i64 {
        self.creation_time
    }

    /// Random identifier distinguishing this store instance.
    pub fn random_identifier(&self) -> i64 {
        self.random_identifier
    }

    /// Current log version.
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    /// Increment the log version, returning the version that was current
    /// before the increment.
    pub fn increment_version(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let current = state.version;
        state.version += 1;
        self.write_out(&state)?;
        Ok(current)
    }

    /// Persisted configuration of an index, if any.
    pub fn index_config(&self, index_name: &str) -> Option<HashMap<String, String>> {
        self.state.lock().index_config.get(index_name).cloned()
    }

    /// Persist the configuration of an index.
    pub fn set_index_config(
        &self,
        index_name: &str,
        config: HashMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.index_config.insert(index_name.to_string(), config);
        self.write_out(&state)
    }

    fn write_out(&self, state: &StoreState) -> Result<()> {
        let mut bytes = Vec::new();
        bytes.write_i64::<BigEndian>(self.creation_time)?;
        bytes.write_i64::<BigEndian>(self.random_identifier)?;
        bytes.write_u64::<BigEndian>(state.version)?;
        for (name, properties) in &state.index_config {
            write_string(&mut bytes, name)?;
            bytes.write_u32::<BigEndian>(properties.len() as u32)?;
            for (key, value) in properties {
                write_string(&mut bytes, key)?;
                write_string(&mut bytes, value)?;
            }
        }
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let units: Vec<u16> = value.encode_utf16().collect();
    out.write_u32::<BigEndian>((units.len() * 2) as u32)?;
    for unit in units {
        out.write_u16::<BigEndian>(unit)?;
    }
    Ok(())
}

/// Read configuration entries until the bytes run out. Truncated entries end
/// the read without error.
fn read_index_config<R: Read>(reader: &mut R) -> HashMap<String, HashMap<String, String>> {
    let mut map = HashMap::new();
    loop {
        let Some(name) = read_string(reader) else {
            break;
        };
        let Some(count) = read_u32(reader) else {
            break;
        };
        let mut properties = HashMap::new();
        let mut complete = true;
        for _ in 0..count {
            let Some(key) = read_string(reader) else {
                complete = false;
                break;
            };
            let Some(value) = read_string(reader) else {
                complete = false;
                break;
            };
            properties.insert(key, value);
        }
        if !complete {
            break;
        }
        map.insert(name, properties);
    }
    map
}

fn read_u32<R: Read>(reader: &mut R) -> Option<u32> {
    reader.read_u32::<BigEndian>().ok()
}

fn read_string<R: Read>(reader: &mut R) -> Option<String> {
    let byte_length = read_u32(reader)? as usize;
    if byte_length % 2 != 0 {
        return None;
    }
    let mut bytes = vec![0u8; byte_length];
    reader.read_exact(&mut bytes).ok()?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}
