//! `BINARY` and `BINARY2` stream decoding.
//!
//! Both are big-endian row streams. Variable-length arrays carry a 4-byte
//! element count before their data. `BINARY2` prefixes every row with a
//! null bitmap, one bit per field, most significant bit first.

use std::io::{Cursor, Read};

use base64::Engine;
use byteorder::{BigEndian, ReadBytesExt};

use super::field::{Datatype, Field};
use super::Cell;
use crate::error::{TableError, TableResult};

/// Decode a base64 `STREAM` body, ignoring embedded whitespace.
pub(crate) fn decode_base64(text: &str) -> TableResult<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
}

pub(crate) fn decode_rows(fields: &[Field], data: &[u8], binary2: bool) -> TableResult<Vec<Vec<Cell>>> {
    let mut cursor = Cursor::new(data);
    let mut rows = Vec::new();
    let mask_len = fields.len().div_ceil(8);

    while (cursor.position() as usize) < data.len() {
        let row = rows.len();
        let start = cursor.position();
        let mut null_flags = vec![0u8; if binary2 { mask_len } else { 0 }];
        if binary2 {
            cursor
                .read_exact(&mut null_flags)
                .map_err(|_| truncated(row, &fields[0]))?;
        }

        let mut cells = Vec::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            let cell = read_cell(&mut cursor, field).map_err(|_| truncated(row, field))?;
            let flagged = binary2 && null_flags[i / 8] & (0x80 >> (i % 8)) != 0;
            cells.push(if flagged { Cell::Masked } else { cell });
        }
        if cursor.position() == start {
            return Err(TableError::EmptyRow(row));
        }
        rows.push(cells);
    }
    Ok(rows)
}

fn truncated(row: usize, field: &Field) -> TableError {
    TableError::Truncated {
        row,
        field: field.name.clone(),
    }
}

fn read_cell(cursor: &mut Cursor<&[u8]>, field: &Field) -> std::io::Result<Cell> {
    let count = if field.arraysize.variable {
        (cursor.read_u32::<BigEndian>()? as usize)
            .checked_mul(field.arraysize.fixed_len())
            .ok_or_else(unexpected_eof)?
    } else {
        field.arraysize.fixed_len()
    };

    // Counts come from the stream; check them before allocating.
    let needed = match field.datatype {
        Datatype::Bit => Some(count.div_ceil(8)),
        datatype => count.checked_mul(datatype.byte_width()),
    }
    .ok_or_else(unexpected_eof)?;
    let remaining = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    if needed as u64 > remaining {
        return Err(unexpected_eof());
    }

    match field.datatype {
        Datatype::Char => {
            let mut buf = vec![0u8; count];
            cursor.read_exact(&mut buf)?;
            Ok(text_cell(field, String::from_utf8_lossy(&buf).into_owned()))
        }
        Datatype::UnicodeChar => {
            let mut units = vec![0u16; count];
            cursor.read_u16_into::<BigEndian>(&mut units)?;
            Ok(text_cell(field, String::from_utf16_lossy(&units)))
        }
        Datatype::Bit => {
            let mut packed = vec![0u8; count.div_ceil(8)];
            cursor.read_exact(&mut packed)?;
            let bits = (0..count)
                .map(|i| Cell::Bool(packed[i / 8] & (0x80 >> (i % 8)) != 0))
                .collect();
            Ok(shape(field, bits))
        }
        _ => {
            let elements = (0..count)
                .map(|_| read_element(cursor, field))
                .collect::<std::io::Result<Vec<_>>>()?;
            Ok(shape(field, elements))
        }
    }
}

fn unexpected_eof() -> std::io::Error {
    std::io::Error::from(std::io::ErrorKind::UnexpectedEof)
}

fn read_element(cursor: &mut Cursor<&[u8]>, field: &Field) -> std::io::Result<Cell> {
    let cell = match field.datatype {
        Datatype::Boolean => match cursor.read_u8()? {
            b'T' | b't' | b'1' => Cell::Bool(true),
            b'F' | b'f' | b'0' => Cell::Bool(false),
            _ => Cell::Masked,
        },
        Datatype::UnsignedByte => int_cell(field, cursor.read_u8()? as i64),
        Datatype::Short => int_cell(field, cursor.read_i16::<BigEndian>()? as i64),
        Datatype::Int => int_cell(field, cursor.read_i32::<BigEndian>()? as i64),
        Datatype::Long => int_cell(field, cursor.read_i64::<BigEndian>()?),
        Datatype::Float => float_cell(field, widen(cursor.read_f32::<BigEndian>()?)),
        Datatype::Double => float_cell(field, cursor.read_f64::<BigEndian>()?),
        Datatype::FloatComplex => complex_cell(
            field,
            widen(cursor.read_f32::<BigEndian>()?),
            widen(cursor.read_f32::<BigEndian>()?),
        ),
        Datatype::DoubleComplex => complex_cell(
            field,
            cursor.read_f64::<BigEndian>()?,
            cursor.read_f64::<BigEndian>()?,
        ),
        // Handled in `read_cell`.
        Datatype::Bit | Datatype::Char | Datatype::UnicodeChar => Cell::Masked,
    };
    Ok(cell)
}

/// Widen through the shortest decimal form so `10.1f32` reads as `10.1`.
fn widen(value: f32) -> f64 {
    if !value.is_finite() {
        return value as f64;
    }
    value.to_string().parse().unwrap_or(value as f64)
}

fn int_cell(field: &Field, value: i64) -> Cell {
    if field.is_null_int(value) {
        Cell::Masked
    } else {
        Cell::Int(value)
    }
}

fn float_cell(field: &Field, value: f64) -> Cell {
    if value.is_nan() || field.is_null_float(value) {
        Cell::Masked
    } else {
        Cell::Float(value)
    }
}

fn complex_cell(field: &Field, re: f64, im: f64) -> Cell {
    match (float_cell(field, re), float_cell(field, im)) {
        (Cell::Masked, _) | (_, Cell::Masked) => Cell::Masked,
        (re, im) => Cell::Array(vec![re, im]),
    }
}

/// Fixed-width strings are NUL padded.
fn text_cell(field: &Field, raw: String) -> Cell {
    let text = raw.trim_end_matches('\0');
    if text.is_empty() || field.is_null_text(text) {
        Cell::Masked
    } else {
        Cell::Text(text.to_string())
    }
}

fn shape(field: &Field, mut elements: Vec<Cell>) -> Cell {
    if field.is_array() {
        Cell::Array(elements)
    } else if elements.len() == 1 {
        elements.remove(0)
    } else {
        Cell::Masked
    }
}
