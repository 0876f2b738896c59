//! Binary table file decoder.
//!
//! Game data ships as binary tabular files: zero or more tables, each a
//! schema ([`RecordTemplate`]) followed by its records. The schema lists
//! `{name, type}` field pairs terminated by the `_TargetTable` sentinel,
//! which carries the table's name. Records serialise their fields in schema
//! order, and decoded [`Record`]s preserve that order.

use std::io::{self, BufReader, Read};

use crate::error::{Result, SpiralError};

/// Type tag announcing a record template.
pub const TYPE_RECORD_TEMPLATE: u8 = 0x01;
/// Type tag announcing a record.
pub const TYPE_RECORD: u8 = 0x02;

/// Schema field terminating the field list and naming the table.
const TARGET_TABLE_FIELD: &str = "_TargetTable";

/// Field type tags as they appear in record templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Gid,
    Int,
    Uint,
    Flt,
    Byt,
    Ubyt,
    Ushrt,
    Dbl,
    Str,
    WStr,
}

impl FieldType {
    /// Map a wire tag to a field type.
    ///
    /// # Errors
    ///
    /// Returns [`SpiralError::UnknownFieldType`] for tags outside the known
    /// repertoire.
    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::Gid,
            1 => Self::Int,
            2 => Self::Uint,
            3 => Self::Flt,
            4 => Self::Byt,
            5 => Self::Ubyt,
            6 => Self::Ushrt,
            7 => Self::Dbl,
            8 => Self::Str,
            9 => Self::WStr,
            other => return Err(SpiralError::UnknownFieldType(other)),
        })
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Gid(u64),
    Int(i32),
    Uint(u32),
    Flt(f32),
    Byt(i8),
    Ubyt(u8),
    Ushrt(u16),
    Dbl(f64),
    Str(String),
    WStr(String),
}

impl FieldValue {
    /// The string contents, for `Str`/`WStr` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::WStr(s) => Some(s),
            _ => None,
        }
    }

    /// The value widened to `u64`, for unsigned integer values.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Gid(v) => Some(*v),
            Self::Uint(v) => Some(u64::from(*v)),
            Self::Ubyt(v) => Some(u64::from(*v)),
            Self::Ushrt(v) => Some(u64::from(*v)),
            _ => None,
        }
    }
}

/// One schema field: a name and a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordField {
    pub name: String,
    pub field_type: FieldType,
}

/// A table's schema: its fields in serialisation order and the table name
/// carried by the `_TargetTable` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTemplate {
    pub size: u16,
    pub fields: Vec<RecordField>,
    pub table: String,
}

/// A decoded record: field values in schema order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    /// Look up a field value by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Iterate the fields in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn push(&mut self, name: String, value: FieldValue) {
        self.fields.push((name, value));
    }
}

/// A decoded table: its name and records.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub records: Vec<Record>,
}

/// Decode every table in the stream.
///
/// A clean end of input at a table boundary ends the stream; end of input
/// anywhere else is an error.
pub fn decode_tables<R: Read>(reader: R) -> Result<Vec<Table>> {
    let mut reader = BufReader::new(reader);
    let mut tables = Vec::new();

    while let Some(record_count) = try_read_record_count(&mut reader)? {
        tables.push(read_table(&mut reader, record_count)?);
    }

    Ok(tables)
}

/// Read the next table's record count, or `None` on clean end of input.
fn try_read_record_count<R: Read>(reader: &mut R) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(SpiralError::Truncated("table record count".to_string())),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(SpiralError::Transport(err)),
        }
    }

    Ok(Some(u32::from_le_bytes(buf)))
}

fn read_table<R: Read>(reader: &mut R, record_count: u32) -> Result<Table> {
    read_type_header(reader, TYPE_RECORD_TEMPLATE)?;

    // The template always precedes the records.
    let template = read_record_template(reader)?;

    let mut records = Vec::new();
    for _ in 0..record_count {
        read_type_header(reader, TYPE_RECORD)?;
        records.push(read_record(reader, &template)?);
    }

    Ok(Table {
        name: template.table,
        records,
    })
}

/// Read the reserved byte and type tag preceding a template or record.
fn read_type_header<R: Read>(reader: &mut R, expected: u8) -> Result<()> {
    let _reserved = read_u8(reader, "type header")?;
    let tag = read_u8(reader, "type header")?;
    if tag != expected {
        return Err(SpiralError::InvalidFormat(format!(
            "expected type tag {expected:#04x} but got {tag:#04x}"
        )));
    }
    Ok(())
}

fn read_record_template<R: Read>(reader: &mut R) -> Result<RecordTemplate> {
    let size = read_u16(reader, "record template")?;

    let mut fields = Vec::new();
    loop {
        let name = read_string(reader, "field name")?;
        let type_tag = read_u8(reader, "field type")?;
        let _pad = read_u8(reader, "field padding")?;

        if name == TARGET_TABLE_FIELD {
            let table = read_string(reader, "target table name")?;
            return Ok(RecordTemplate { size, fields, table });
        }

        fields.push(RecordField {
            name,
            field_type: FieldType::from_tag(type_tag)?,
        });
    }
}

fn read_record<R: Read>(reader: &mut R, template: &RecordTemplate) -> Result<Record> {
    let _size = read_u16(reader, "record")?;

    let mut record = Record::default();
    for field in &template.fields {
        let value = match field.field_type {
            FieldType::Gid => FieldValue::Gid(read_u64(reader, "gid field")?),
            FieldType::Int => FieldValue::Int(read_u32(reader, "int field")? as i32),
            FieldType::Uint => FieldValue::Uint(read_u32(reader, "uint field")?),
            FieldType::Flt => FieldValue::Flt(f32::from_bits(read_u32(reader, "flt field")?)),
            FieldType::Byt => FieldValue::Byt(read_u8(reader, "byt field")? as i8),
            FieldType::Ubyt => FieldValue::Ubyt(read_u8(reader, "ubyt field")?),
            FieldType::Ushrt => FieldValue::Ushrt(read_u16(reader, "ushrt field")?),
            FieldType::Dbl => FieldValue::Dbl(f64::from_bits(read_u64(reader, "dbl field")?)),
            FieldType::Str => FieldValue::Str(read_string(reader, "str field")?),
            FieldType::WStr => FieldValue::WStr(read_string(reader, "wstr field")?),
        };
        record.push(field.name.clone(), value);
    }

    Ok(record)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => SpiralError::Truncated(what.to_string()),
        _ => SpiralError::Transport(err),
    })
}

fn read_u8<R: Read>(reader: &mut R, what: &str) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_exact(reader, &mut buf, what)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(reader: &mut R, what: &str) -> Result<u16> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf, what)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R, what: &str) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf, what)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string<R: Read>(reader: &mut R, what: &str) -> Result<String> {
    let len = read_u16(reader, what)? as usize;
    let mut buf = vec![0u8; len];
    read_exact(reader, &mut buf, what)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_str(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    fn put_template_field(buf: &mut Vec<u8>, name: &str, type_tag: u8) {
        put_str(buf, name);
        buf.push(type_tag);
        buf.push(0);
    }

    /// One table named `_TableList` with a single record `{Name: "Test"}`.
    fn table_list_fixture() -> Vec<u8> {
        let mut buf = Vec::new();

        // Record count.
        buf.extend_from_slice(&1u32.to_le_bytes());

        // Template header and body.
        buf.push(0);
        buf.push(TYPE_RECORD_TEMPLATE);
        buf.extend_from_slice(&0u16.to_le_bytes());
        put_template_field(&mut buf, "Name", 8);
        put_template_field(&mut buf, TARGET_TABLE_FIELD, 8);
        put_str(&mut buf, "_TableList");

        // Record.
        buf.push(0);
        buf.push(TYPE_RECORD);
        buf.extend_from_slice(&0u16.to_le_bytes());
        put_str(&mut buf, "Test");

        buf
    }

    #[test]
    fn test_decode_table_list() {
        let tables = decode_tables(table_list_fixture().as_slice()).unwrap();

        assert_eq!(tables.len(), 1);
        let first = &tables[0];
        assert_eq!(first.name, "_TableList");
        assert_eq!(first.records.len(), 1);
        assert_eq!(
            first.records[0].get("Name"),
            Some(&FieldValue::Str("Test".to_string()))
        );
    }

    #[test]
    fn test_decode_empty_input() {
        let tables = decode_tables(io::empty()).unwrap();
        assert!(tables.is_empty());
    }

    #[test]
    fn test_decode_all_field_types_in_schema_order() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.push(0);
        buf.push(TYPE_RECORD_TEMPLATE);
        buf.extend_from_slice(&0u16.to_le_bytes());
        put_template_field(&mut buf, "TemplateID", 0); // GID
        put_template_field(&mut buf, "Delta", 1); // INT
        put_template_field(&mut buf, "HeaderCRC", 2); // UINT
        put_template_field(&mut buf, "Scale", 3); // FLT
        put_template_field(&mut buf, "Tilt", 4); // BYT
        put_template_field(&mut buf, "Flags", 5); // UBYT
        put_template_field(&mut buf, "Zone", 6); // USHRT
        put_template_field(&mut buf, "Ratio", 7); // DBL
        put_template_field(&mut buf, "SrcFileName", 8); // STR
        put_template_field(&mut buf, "Label", 9); // WSTR
        put_template_field(&mut buf, TARGET_TABLE_FIELD, 8);
        put_str(&mut buf, "_Shared-WorldData");

        buf.push(0);
        buf.push(TYPE_RECORD);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0x0102030405060708u64.to_le_bytes());
        buf.extend_from_slice(&(-7i32).to_le_bytes());
        buf.extend_from_slice(&2647210788u32.to_le_bytes());
        buf.extend_from_slice(&1.5f32.to_le_bytes());
        buf.extend_from_slice(&(-3i8).to_le_bytes());
        buf.push(0xFF);
        buf.extend_from_slice(&40004u16.to_le_bytes());
        buf.extend_from_slice(&(-2.25f64).to_le_bytes());
        put_str(&mut buf, "Data/GameData/_Shared-WorldData.wad");
        put_str(&mut buf, "wide");

        let tables = decode_tables(buf.as_slice()).unwrap();
        let table = &tables[0];
        assert_eq!(table.name, "_Shared-WorldData");

        let record = &table.records[0];
        assert_eq!(record.len(), 10);
        assert_eq!(record.get("TemplateID"), Some(&FieldValue::Gid(0x0102030405060708)));
        assert_eq!(record.get("Delta"), Some(&FieldValue::Int(-7)));
        assert_eq!(record.get("HeaderCRC"), Some(&FieldValue::Uint(2647210788)));
        assert_eq!(record.get("Scale"), Some(&FieldValue::Flt(1.5)));
        assert_eq!(record.get("Tilt"), Some(&FieldValue::Byt(-3)));
        assert_eq!(record.get("Flags"), Some(&FieldValue::Ubyt(0xFF)));
        assert_eq!(record.get("Zone"), Some(&FieldValue::Ushrt(40004)));
        assert_eq!(record.get("Ratio"), Some(&FieldValue::Dbl(-2.25)));
        assert_eq!(
            record.get("SrcFileName").and_then(FieldValue::as_str),
            Some("Data/GameData/_Shared-WorldData.wad")
        );
        assert_eq!(record.get("Label"), Some(&FieldValue::WStr("wide".to_string())));

        // Iteration order matches schema order.
        let names: Vec<_> = record.iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec![
                "TemplateID", "Delta", "HeaderCRC", "Scale", "Tilt", "Flags", "Zone", "Ratio",
                "SrcFileName", "Label"
            ]
        );
    }

    #[test]
    fn test_multiple_tables() {
        let mut buf = table_list_fixture();
        buf.extend(table_list_fixture());

        let tables = decode_tables(buf.as_slice()).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].name, "_TableList");
    }

    #[test]
    fn test_unknown_field_type() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(0);
        buf.push(TYPE_RECORD_TEMPLATE);
        buf.extend_from_slice(&0u16.to_le_bytes());
        put_template_field(&mut buf, "Mystery", 0xAA);

        let result = decode_tables(buf.as_slice());
        assert!(matches!(result, Err(SpiralError::UnknownFieldType(0xAA))));
    }

    #[test]
    fn test_unexpected_type_tag() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(0);
        buf.push(0x07); // not a record template

        let result = decode_tables(buf.as_slice());
        assert!(matches!(result, Err(SpiralError::InvalidFormat(_))));
    }

    #[test]
    fn test_truncated_mid_table() {
        let fixture = table_list_fixture();
        let result = decode_tables(&fixture[..fixture.len() - 3]);
        assert!(matches!(result, Err(SpiralError::Truncated(_))));
    }

    #[test]
    fn test_truncated_record_count() {
        // Two stray bytes cannot form a record count.
        let result = decode_tables([0x01u8, 0x00].as_slice());
        assert!(matches!(result, Err(SpiralError::Truncated(_))));
    }
}
