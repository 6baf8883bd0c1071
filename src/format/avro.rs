//! Avro encoding of a [`RowSet`].
//!
//! Each column becomes one nullable field (`["null", T]`). Arrow types are
//! narrowed to the handful of Avro primitives a CSV can produce; anything
//! else is written as its string rendering.

use super::RowSet;
use anyhow::{Context, Result};
use apache_avro::types::Value;
use apache_avro::{Reader, Schema, Writer};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Date32Type, Float64Type, Int64Type, SchemaRef, TimeUnit, TimestampMicrosecondType,
};
use serde_json::json;
use std::collections::HashSet;

const RECORD_NAME: &str = "row";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AvroKind {
    Null,
    Boolean,
    Long,
    Double,
    String,
    Date,
    TimestampMicros,
}

impl AvroKind {
    fn of(data_type: &DataType) -> Self {
        match data_type {
            DataType::Null => Self::Null,
            DataType::Boolean => Self::Boolean,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32 => Self::Long,
            DataType::Float16 | DataType::Float32 | DataType::Float64 => Self::Double,
            DataType::Date32 | DataType::Date64 => Self::Date,
            DataType::Timestamp(..) => Self::TimestampMicros,
            _ => Self::String,
        }
    }

    fn avro_type(self) -> serde_json::Value {
        match self {
            Self::Null => json!("null"),
            Self::Boolean => json!("boolean"),
            Self::Long => json!("long"),
            Self::Double => json!("double"),
            Self::String => json!("string"),
            Self::Date => json!({ "type": "int", "logicalType": "date" }),
            Self::TimestampMicros => json!({ "type": "long", "logicalType": "timestamp-micros" }),
        }
    }

    /// Arrow type the column is cast to before values are read out.
    fn arrow_type(self, source: &DataType) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Boolean => DataType::Boolean,
            Self::Long => DataType::Int64,
            Self::Double => DataType::Float64,
            Self::String => DataType::Utf8,
            Self::Date => DataType::Date32,
            Self::TimestampMicros => match source {
                DataType::Timestamp(_, tz) => DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
                _ => DataType::Timestamp(TimeUnit::Microsecond, None),
            },
        }
    }
}

/// Turn a column name into a valid Avro name, `[A-Za-z_][A-Za-z0-9_]*`.
fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Sanitised, unique field names in column order.
fn field_names(schema: &SchemaRef) -> Vec<String> {
    let mut seen = HashSet::new();
    schema
        .fields()
        .iter()
        .map(|field| {
            let base = sanitize_name(field.name());
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.clone()) {
                name = format!("{base}_{n}");
                n += 1;
            }
            name
        })
        .collect()
}

/// Derive the Avro record schema for an Arrow schema.
///
/// # Errors
/// Returns an error if the generated schema is rejected by the Avro parser.
pub fn avro_schema(schema: &SchemaRef) -> Result<Schema> {
    let fields: Vec<_> = field_names(schema)
        .into_iter()
        .zip(schema.fields().iter())
        .map(|(name, field)| {
            let kind = AvroKind::of(field.data_type());
            let ty = match kind {
                AvroKind::Null => kind.avro_type(),
                _ => json!(["null", kind.avro_type()]),
            };
            json!({ "name": name, "type": ty, "default": null })
        })
        .collect();

    let record = json!({ "type": "record", "name": RECORD_NAME, "fields": fields });
    Schema::parse(&record).context("parse generated Avro schema")
}

fn cell(column: &ArrayRef, kind: AvroKind, row: usize) -> Value {
    if kind == AvroKind::Null {
        return Value::Null;
    }
    if column.is_null(row) {
        return Value::Union(0, Box::new(Value::Null));
    }
    let value = match kind {
        AvroKind::Null => Value::Null,
        AvroKind::Boolean => Value::Boolean(column.as_boolean().value(row)),
        AvroKind::Long => Value::Long(column.as_primitive::<Int64Type>().value(row)),
        AvroKind::Double => Value::Double(column.as_primitive::<Float64Type>().value(row)),
        AvroKind::String => Value::String(column.as_string::<i32>().value(row).to_owned()),
        AvroKind::Date => Value::Date(column.as_primitive::<Date32Type>().value(row)),
        AvroKind::TimestampMicros => {
            Value::TimestampMicros(column.as_primitive::<TimestampMicrosecondType>().value(row))
        }
    };
    Value::Union(1, Box::new(value))
}

/// Encode every row of `rows` into an Avro object container file.
///
/// # Errors
/// Returns an error if a column cannot be cast to its Avro type or the
/// writer rejects a record.
pub fn encode_avro(rows: &RowSet) -> Result<Vec<u8>> {
    let schema = avro_schema(rows.schema())?;
    let names = field_names(rows.schema());
    let kinds: Vec<_> = rows
        .schema()
        .fields()
        .iter()
        .map(|f| AvroKind::of(f.data_type()))
        .collect();

    let mut writer = Writer::new(&schema, Vec::new());
    for batch in rows.batches() {
        let columns = batch
            .columns()
            .iter()
            .zip(&kinds)
            .map(|(column, kind)| {
                cast(column, &kind.arrow_type(column.data_type()))
                    .with_context(|| format!("cast column to Avro {kind:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        for row in 0..batch.num_rows() {
            let fields = names
                .iter()
                .zip(columns.iter().zip(&kinds))
                .map(|(name, (column, kind))| (name.clone(), cell(column, *kind, row)))
                .collect();
            writer
                .append(Value::Record(fields))
                .with_context(|| format!("append Avro record #{row}"))?;
        }
    }

    writer.into_inner().context("finish Avro container")
}

/// Decode an Avro object container file into its records.
///
/// # Errors
/// Returns an error if the bytes are not a readable Avro container.
pub fn decode_avro(data: &[u8]) -> Result<Vec<Value>> {
    let reader = Reader::new(data).context("open Avro container")?;
    reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("read Avro records")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::parse_csv;

    fn field<'a>(record: &'a Value, name: &str) -> &'a Value {
        let Value::Record(fields) = record else {
            panic!("not a record: {record:?}");
        };
        fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .unwrap_or_else(|| panic!("missing field {name}"))
    }

    #[test]
    fn names_are_sanitised_and_unique() {
        assert_eq!(sanitize_name("first name"), "first_name");
        assert_eq!(sanitize_name("2024"), "_2024");
        assert_eq!(sanitize_name(""), "_");
        assert_eq!(sanitize_name("ok_1"), "ok_1");

        let rows = parse_csv(b"a b,a-b,1x\n1,2,3\n").unwrap();
        assert_eq!(field_names(rows.schema()), ["a_b", "a_b_2", "_1x"]);
    }

    #[test]
    fn records_round_trip() -> Result<()> {
        let rows = parse_csv(b"id,name,score,active\n1,alice,9.5,true\n2,,7.25,false\n")?;
        let bytes = encode_avro(&rows)?;
        assert_eq!(&bytes[..4], b"Obj\x01");

        let records = decode_avro(&bytes)?;
        assert_eq!(records.len(), 2);
        assert_eq!(field(&records[0], "id"), &Value::Union(1, Box::new(Value::Long(1))));
        assert_eq!(
            field(&records[0], "name"),
            &Value::Union(1, Box::new(Value::String("alice".into())))
        );
        assert_eq!(field(&records[1], "score"), &Value::Union(1, Box::new(Value::Double(7.25))));
        assert_eq!(
            field(&records[1], "active"),
            &Value::Union(1, Box::new(Value::Boolean(false)))
        );
        assert_eq!(field(&records[1], "name"), &Value::Union(0, Box::new(Value::Null)));
        Ok(())
    }

    #[test]
    fn header_only_input_yields_empty_container() -> Result<()> {
        let rows = parse_csv(b"id,name\n")?;
        let bytes = encode_avro(&rows)?;
        assert!(decode_avro(&bytes)?.is_empty());
        Ok(())
    }
}
