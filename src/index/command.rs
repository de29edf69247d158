//! Durable command records for the logical log.
//!
//! Commands are the unit of durability: every mutation queued in a
//! transaction is serialized as one command at prepare time and replayed at
//! commit or during crash recovery. The binary layout is fixed:
//!
//! ```text
//! [opcode:1][kind:1][nameLen:4][entityId:8][keyLen:4][valueLen:4]
//! [nameBytes][keyBytes][valueBytes]
//! ```
//!
//! Multi-byte integers are big-endian; string lengths count UTF-16 code
//! units and string bytes are UTF-16BE. A record cut short by a crash
//! decodes as end-of-log rather than an error, so replay stops cleanly at
//! the truncation point.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{MuninnError, Result};
use crate::query::Query;

use super::identifier::{EntityKind, IndexIdentifier};

const ADD_COMMAND: u8 = 1;
const REMOVE_COMMAND: u8 = 2;
const REMOVE_QUERY_COMMAND: u8 = 3;

/// Sentinel entity id carried by remove-by-query commands.
pub const REMOVE_QUERY_ENTITY_ID: i64 = -1;

/// Strings longer than this many UTF-16 code units are treated as log
/// corruption.
const MAX_STRING_UNITS: u32 = 1 << 26;

/// The payload shared by all command variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandData {
    pub identifier: IndexIdentifier,
    pub entity_id: i64,
    pub key: String,
    pub value: String,
}

/// One durable index operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCommand {
    /// Add one (entity, key, value) triple.
    Add(CommandData),
    /// Remove one (entity, key, value) triple.
    Remove(CommandData),
    /// Remove everything matching a query; the query's textual form travels
    /// in `value` and the entity id is the [`REMOVE_QUERY_ENTITY_ID`]
    /// sentinel.
    RemoveQuery(CommandData),
}

impl IndexCommand {
    /// Create an add command.
    pub fn add(identifier: IndexIdentifier, entity_id: i64, key: &str, value: &str) -> Self {
        IndexCommand::Add(CommandData {
            identifier,
            entity_id,
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Create a remove command.
    pub fn remove(identifier: IndexIdentifier, entity_id: i64, key: &str, value: &str) -> Self {
        IndexCommand::Remove(CommandData {
            identifier,
            entity_id,
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Create a remove-by-query command.
    pub fn remove_query(identifier: IndexIdentifier, query: &Query) -> Self {
        IndexCommand::RemoveQuery(CommandData {
            identifier,
            entity_id: REMOVE_QUERY_ENTITY_ID,
            key: String::new(),
            value: query.to_string(),
        })
    }

    /// The command payload.
    pub fn data(&self) -> &CommandData {
        match self {
            IndexCommand::Add(data) | IndexCommand::Remove(data) | IndexCommand::RemoveQuery(data) => {
                data
            }
        }
    }

    /// The index this command targets.
    pub fn identifier(&self) -> &IndexIdentifier {
        &self.data().identifier
    }

    fn opcode(&self) -> u8 {
        match self {
            IndexCommand::Add(_) => ADD_COMMAND,
            IndexCommand::Remove(_) => REMOVE_COMMAND,
            IndexCommand::RemoveQuery(_) => REMOVE_QUERY_COMMAND,
        }
    }

    /// Serialize this command to the log.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let data = self.data();
        let name: Vec<u16> = data.identifier.name.encode_utf16().collect();
        let key: Vec<u16> = data.key.encode_utf16().collect();
        let value: Vec<u16> = data.value.encode_utf16().collect();

        writer.write_u8(self.opcode())?;
        writer.write_u8(data.identifier.kind.as_byte())?;
        writer.write_u32::<BigEndian>(name.len() as u32)?;
        writer.write_i64::<BigEndian>(data.entity_id)?;
        writer.write_u32::<BigEndian>(key.len() as u32)?;
        writer.write_u32::<BigEndian>(value.len() as u32)?;

        for units in [&name, &key, &value] {
            for unit in units {
                writer.write_u16::<BigEndian>(*unit)?;
            }
        }
        Ok(())
    }

    /// Deserialize one command from the log.
    ///
    /// Returns `None` at a clean end of log and at any truncated or corrupt
    /// record, so replay simply stops there. An unknown opcode on an
    /// otherwise complete record is an error.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<IndexCommand>> {
        let mut opcode = [0u8; 1];
        if !read_exact_or_eof(reader, &mut opcode)? {
            return Ok(None);
        }
        let opcode = opcode[0];

        let mut header = [0u8; 21];
        if !read_exact_or_eof(reader, &mut header)? {
            return Ok(None);
        }
        let mut header = &header[..];
        let kind = match EntityKind::from_byte(header.read_u8()?) {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let name_len = header.read_u32::<BigEndian>()?;
        let entity_id = header.read_i64::<BigEndian>()?;
        let key_len = header.read_u32::<BigEndian>()?;
        let value_len = header.read_u32::<BigEndian>()?;

        let name = match read_string(reader, name_len)? {
            Some(name) => name,
            None => return Ok(None),
        };
        let key = match read_string(reader, key_len)? {
            Some(key) => key,
            None => return Ok(None),
        };
        let value = match read_string(reader, value_len)? {
            Some(value) => value,
            None => return Ok(None),
        };

        let data = CommandData {
            identifier: IndexIdentifier::new(kind, name),
            entity_id,
            key,
            value,
        };
        match opcode {
            ADD_COMMAND => Ok(Some(IndexCommand::Add(data))),
            REMOVE_COMMAND => Ok(Some(IndexCommand::Remove(data))),
            REMOVE_QUERY_COMMAND => Ok(Some(IndexCommand::RemoveQuery(data))),
            unknown => Err(MuninnError::serialization(format!(
                "unknown command opcode {unknown}"
            ))),
        }
    }
}

/// Fill `buf` from the reader; `false` means the stream ended first.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

/// Read a length-prefixed UTF-16BE string; `None` on truncation or
/// corruption.
fn read_string<R: Read>(reader: &mut R, units: u32) -> Result<Option<String>> {
    if units > MAX_STRING_UNITS {
        return Ok(None);
    }
    let mut bytes = vec![0u8; units as usize * 2];
    if !read_exact_or_eof(reader, &mut bytes)? {
        return Ok(None);
    }
    let code_units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16(&code_units).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn identifier() -> IndexIdentifier {
        IndexIdentifier::new(EntityKind::Node, "people")
    }

    fn roundtrip(command: &IndexCommand) -> IndexCommand {
        let mut bytes = Vec::new();
        command.write_to(&mut bytes).unwrap();
        IndexCommand::read_from(&mut Cursor::new(bytes))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_roundtrip_add_and_remove() {
        let add = IndexCommand::add(identifier(), 42, "name", "alice");
        assert_eq!(roundtrip(&add), add);

        let remove = IndexCommand::remove(
            IndexIdentifier::new(EntityKind::Relationship, "knows"),
            7,
            "since",
            "2003",
        );
        assert_eq!(roundtrip(&remove), remove);
    }

    #[test]
    fn test_roundtrip_multibyte_strings() {
        let command = IndexCommand::add(
            IndexIdentifier::new(EntityKind::Node, "様々な索引"),
            i64::MAX,
            "nyckel åäö",
            "värde 🦀 𝄞",
        );
        assert_eq!(roundtrip(&command), command);
    }

    #[test]
    fn test_roundtrip_remove_query_sentinel() {
        let query = Query::must_all(vec![
            Query::term("_id_", "9"),
            Query::term("name_e", "alice"),
        ]);
        let command = IndexCommand::remove_query(identifier(), &query);
        let decoded = roundtrip(&command);

        assert_eq!(decoded, command);
        let data = decoded.data();
        assert_eq!(data.entity_id, REMOVE_QUERY_ENTITY_ID);
        assert!(data.key.is_empty());
        assert_eq!(Query::parse(None, &data.value).unwrap(), query);
    }

    #[test]
    fn test_truncated_record_is_end_of_log() {
        let command = IndexCommand::add(identifier(), 1, "name", "alice");
        let mut bytes = Vec::new();
        command.write_to(&mut bytes).unwrap();

        for cut in 1..bytes.len() {
            let decoded = IndexCommand::read_from(&mut Cursor::new(&bytes[..cut])).unwrap();
            assert!(decoded.is_none(), "cut at {cut} should read as end-of-log");
        }
    }

    #[test]
    fn test_empty_stream_is_end_of_log() {
        let decoded = IndexCommand::read_from(&mut Cursor::new(Vec::new())).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_unknown_opcode_is_error() {
        let command = IndexCommand::add(identifier(), 1, "k", "v");
        let mut bytes = Vec::new();
        command.write_to(&mut bytes).unwrap();
        bytes[0] = 99;

        assert!(IndexCommand::read_from(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_unknown_entity_kind_is_end_of_log() {
        let command = IndexCommand::add(identifier(), 1, "k", "v");
        let mut bytes = Vec::new();
        command.write_to(&mut bytes).unwrap();
        bytes[1] = 99;

        let decoded = IndexCommand::read_from(&mut Cursor::new(bytes)).unwrap();
        assert!(decoded.is_none());
    }
}
