//! `TABLEDATA` cell parsing: the text of one `<TD>` into a [`Cell`].

use super::field::{parse_int, Datatype, Field};
use super::Cell;
use crate::error::{TableError, TableResult};

pub(crate) fn parse_cell(field: &Field, text: &str, row: usize) -> TableResult<Cell> {
    let text = text.trim();
    let invalid = || TableError::InvalidValue {
        row,
        field: field.name.clone(),
        value: text.to_string(),
        datatype: field.datatype.name(),
    };

    if field.datatype.is_text() {
        if text.is_empty() || field.is_null_text(text) {
            return Ok(Cell::Masked);
        }
        return Ok(Cell::Text(text.to_string()));
    }
    if text.is_empty() {
        return Ok(Cell::Masked);
    }

    if field.datatype == Datatype::Bit {
        // Bits may be written packed ("0110") or separated ("0 1 1 0").
        let bits = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| match c {
                '0' => Some(Cell::Bool(false)),
                '1' => Some(Cell::Bool(true)),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?;
        return Ok(collapse(field, bits));
    }

    let tokens: Vec<&str> = text.split_whitespace().collect();

    if field.datatype.is_complex() {
        if tokens.len() % 2 != 0 {
            return Err(invalid());
        }
        let pairs = tokens
            .chunks(2)
            .map(|pair| {
                let re = parse_float(field, pair[0]).ok_or_else(invalid)?;
                let im = parse_float(field, pair[1]).ok_or_else(invalid)?;
                Ok(match (re, im) {
                    (Cell::Masked, _) | (_, Cell::Masked) => Cell::Masked,
                    (re, im) => Cell::Array(vec![re, im]),
                })
            })
            .collect::<TableResult<Vec<_>>>()?;
        return Ok(collapse(field, pairs));
    }

    let cells = tokens
        .iter()
        .map(|token| parse_token(field, token).ok_or_else(invalid))
        .collect::<TableResult<Vec<_>>>()?;
    Ok(collapse(field, cells))
}

/// Scalar fields hold exactly one element; array fields keep the list.
fn collapse(field: &Field, mut cells: Vec<Cell>) -> Cell {
    if field.is_array() {
        Cell::Array(cells)
    } else if cells.len() == 1 {
        cells.remove(0)
    } else if cells.is_empty() {
        Cell::Masked
    } else {
        Cell::Array(cells)
    }
}

fn parse_token(field: &Field, token: &str) -> Option<Cell> {
    match field.datatype {
        Datatype::Boolean => parse_bool(token),
        Datatype::UnsignedByte => parse_bounded(field, token, 0, u8::MAX as i64),
        Datatype::Short => parse_bounded(field, token, i16::MIN as i64, i16::MAX as i64),
        Datatype::Int => parse_bounded(field, token, i32::MIN as i64, i32::MAX as i64),
        Datatype::Long => parse_bounded(field, token, i64::MIN, i64::MAX),
        Datatype::Float | Datatype::Double => parse_float(field, token),
        // Handled by the caller.
        Datatype::Bit
        | Datatype::Char
        | Datatype::UnicodeChar
        | Datatype::FloatComplex
        | Datatype::DoubleComplex => None,
    }
}

pub(crate) fn parse_bool(token: &str) -> Option<Cell> {
    match token {
        "T" | "t" | "1" => Some(Cell::Bool(true)),
        "F" | "f" | "0" => Some(Cell::Bool(false)),
        "?" => Some(Cell::Masked),
        _ if token.eq_ignore_ascii_case("true") => Some(Cell::Bool(true)),
        _ if token.eq_ignore_ascii_case("false") => Some(Cell::Bool(false)),
        _ => None,
    }
}

fn parse_bounded(field: &Field, token: &str, min: i64, max: i64) -> Option<Cell> {
    let value = parse_int(token)?;
    if field.is_null_int(value) {
        return Some(Cell::Masked);
    }
    (min..=max).contains(&value).then_some(Cell::Int(value))
}

fn parse_float(field: &Field, token: &str) -> Option<Cell> {
    let value = token.parse::<f64>().ok()?;
    if value.is_nan() || field.is_null_float(value) {
        return Some(Cell::Masked);
    }
    Some(Cell::Float(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::votable::ArraySize;

    fn scalar(datatype: Datatype) -> Field {
        Field::new("col", datatype)
    }

    fn array(datatype: Datatype, arraysize: &str) -> Field {
        Field::new("col", datatype).with_arraysize(ArraySize::parse(arraysize).unwrap())
    }

    #[test]
    fn test_numeric_scalars() {
        assert_eq!(
            parse_cell(&scalar(Datatype::Long), "5853498713160606720", 0).unwrap(),
            Cell::Int(5853498713160606720)
        );
        assert_eq!(parse_cell(&scalar(Datatype::Double), " 150.25 ", 0).unwrap(), Cell::Float(150.25));
        assert_eq!(parse_cell(&scalar(Datatype::Short), "0x10", 0).unwrap(), Cell::Int(16));
    }

    #[test]
    fn test_long_extremes() {
        let field = scalar(Datatype::Long);
        assert_eq!(
            parse_cell(&field, "-9223372036854775808", 0).unwrap(),
            Cell::Int(i64::MIN)
        );
        assert_eq!(
            parse_cell(&field, "9223372036854775807", 0).unwrap(),
            Cell::Int(i64::MAX)
        );

        let masked = scalar(Datatype::Long).with_null("-9223372036854775808");
        assert_eq!(
            parse_cell(&masked, "-9223372036854775808", 0).unwrap(),
            Cell::Masked
        );
    }

    #[test]
    fn test_out_of_range_integer_is_invalid() {
        let err = parse_cell(&scalar(Datatype::UnsignedByte), "300", 4).unwrap_err();
        assert!(matches!(err, TableError::InvalidValue { row: 4, .. }));
    }

    #[test]
    fn test_masked_forms() {
        assert_eq!(parse_cell(&scalar(Datatype::Double), "", 0).unwrap(), Cell::Masked);
        assert_eq!(parse_cell(&scalar(Datatype::Double), "NaN", 0).unwrap(), Cell::Masked);
        assert_eq!(parse_cell(&scalar(Datatype::Boolean), "?", 0).unwrap(), Cell::Masked);
        assert_eq!(parse_cell(&scalar(Datatype::Char), "", 0).unwrap(), Cell::Masked);

        let with_null = scalar(Datatype::Int).with_null("-999");
        assert_eq!(parse_cell(&with_null, "-999", 0).unwrap(), Cell::Masked);
        assert_eq!(parse_cell(&with_null, "-998", 0).unwrap(), Cell::Int(-998));
    }

    #[test]
    fn test_booleans() {
        let field = scalar(Datatype::Boolean);
        assert_eq!(parse_cell(&field, "T", 0).unwrap(), Cell::Bool(true));
        assert_eq!(parse_cell(&field, "false", 0).unwrap(), Cell::Bool(false));
        assert!(parse_cell(&field, "maybe", 0).is_err());
    }

    #[test]
    fn test_arrays() {
        let field = array(Datatype::Float, "3");
        assert_eq!(
            parse_cell(&field, "1 2.5 NaN", 0).unwrap(),
            Cell::Array(vec![Cell::Float(1.0), Cell::Float(2.5), Cell::Masked])
        );

        let bits = array(Datatype::Bit, "4");
        assert_eq!(
            parse_cell(&bits, "0110", 0).unwrap(),
            Cell::Array(vec![
                Cell::Bool(false),
                Cell::Bool(true),
                Cell::Bool(true),
                Cell::Bool(false)
            ])
        );
    }

    #[test]
    fn test_complex_scalar() {
        let field = scalar(Datatype::DoubleComplex);
        assert_eq!(
            parse_cell(&field, "1.0 -2.0", 0).unwrap(),
            Cell::Array(vec![Cell::Float(1.0), Cell::Float(-2.0)])
        );
        assert!(parse_cell(&field, "1.0", 0).is_err());
    }

    #[test]
    fn test_char_keeps_inner_spaces() {
        let field = array(Datatype::Char, "*");
        assert_eq!(
            parse_cell(&field, "Gaia DR3", 0).unwrap(),
            Cell::Text("Gaia DR3".into())
        );
    }
}
