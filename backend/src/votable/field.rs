//! Column metadata: `FIELD` datatype, `arraysize` and null sentinel.

use serde::Serialize;

use crate::error::{TableError, TableResult};

/// VOTable primitive datatypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Datatype {
    Boolean,
    Bit,
    UnsignedByte,
    Short,
    Int,
    Long,
    Char,
    UnicodeChar,
    Float,
    Double,
    FloatComplex,
    DoubleComplex,
}

impl Datatype {
    pub fn from_name(name: &str) -> Option<Self> {
        let datatype = match name {
            "boolean" => Datatype::Boolean,
            "bit" => Datatype::Bit,
            "unsignedByte" => Datatype::UnsignedByte,
            "short" => Datatype::Short,
            "int" => Datatype::Int,
            "long" => Datatype::Long,
            "char" => Datatype::Char,
            "unicodeChar" => Datatype::UnicodeChar,
            "float" => Datatype::Float,
            "double" => Datatype::Double,
            "floatComplex" => Datatype::FloatComplex,
            "doubleComplex" => Datatype::DoubleComplex,
            _ => return None,
        };
        Some(datatype)
    }

    pub fn name(self) -> &'static str {
        match self {
            Datatype::Boolean => "boolean",
            Datatype::Bit => "bit",
            Datatype::UnsignedByte => "unsignedByte",
            Datatype::Short => "short",
            Datatype::Int => "int",
            Datatype::Long => "long",
            Datatype::Char => "char",
            Datatype::UnicodeChar => "unicodeChar",
            Datatype::Float => "float",
            Datatype::Double => "double",
            Datatype::FloatComplex => "floatComplex",
            Datatype::DoubleComplex => "doubleComplex",
        }
    }

    /// Character arrays are read as strings.
    pub fn is_text(self) -> bool {
        matches!(self, Datatype::Char | Datatype::UnicodeChar)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Datatype::UnsignedByte | Datatype::Short | Datatype::Int | Datatype::Long
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(self, Datatype::FloatComplex | Datatype::DoubleComplex)
    }

    /// Size of one element in a BINARY stream. Bits are packed and have no
    /// per-element width.
    pub(crate) fn byte_width(self) -> usize {
        match self {
            Datatype::Boolean | Datatype::UnsignedByte | Datatype::Char => 1,
            Datatype::Short | Datatype::UnicodeChar => 2,
            Datatype::Int | Datatype::Float => 4,
            Datatype::Long | Datatype::Double | Datatype::FloatComplex => 8,
            Datatype::DoubleComplex => 16,
            Datatype::Bit => 0,
        }
    }
}

/// Parsed `arraysize` attribute.
///
/// `"3x2"` has `dims == [3, 2]`; `"3x*"` has `dims == [3]` and a variable
/// last dimension; `"*"` and `"10*"` have no fixed dims and are variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArraySize {
    pub dims: Vec<usize>,
    pub variable: bool,
}

impl ArraySize {
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Some(Self::scalar());
        }
        let parts: Vec<&str> = raw.split('x').collect();
        let (last, leading) = parts.split_last()?;
        let mut dims = leading
            .iter()
            .map(|p| p.trim().parse::<usize>().ok())
            .collect::<Option<Vec<_>>>()?;

        let last = last.trim();
        let variable = match last.strip_suffix('*') {
            // "10*" only bounds the length; the bound is not needed to decode.
            Some(bound) => {
                if !bound.is_empty() {
                    bound.parse::<usize>().ok()?;
                }
                true
            }
            None => {
                dims.push(last.parse::<usize>().ok()?);
                false
            }
        };
        Some(Self { dims, variable })
    }

    pub fn is_scalar(&self) -> bool {
        !self.variable && self.dims.iter().all(|&d| d == 1)
    }

    /// Product of the fixed dimensions.
    pub fn fixed_len(&self) -> usize {
        self.dims.iter().product()
    }
}

/// One table column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    /// Unique column name used as JSON key.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub datatype: Datatype,
    pub arraysize: ArraySize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ucd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw `VALUES/@null` sentinel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null: Option<String>,
    #[serde(skip)]
    null_int: Option<i64>,
    #[serde(skip)]
    null_float: Option<f64>,
}

impl Field {
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            id: None,
            datatype,
            arraysize: ArraySize::scalar(),
            unit: None,
            ucd: None,
            description: None,
            null: None,
            null_int: None,
            null_float: None,
        }
    }

    /// Build a field from raw attribute values.
    pub(crate) fn from_attributes(
        name: String,
        datatype: Option<&str>,
        arraysize: Option<&str>,
    ) -> TableResult<Self> {
        let datatype_raw = datatype.unwrap_or("");
        let datatype =
            Datatype::from_name(datatype_raw).ok_or_else(|| TableError::UnsupportedDatatype {
                field: name.clone(),
                datatype: datatype_raw.to_string(),
            })?;
        let mut field = Self::new(name, datatype);
        if let Some(raw) = arraysize {
            field.arraysize = ArraySize::parse(raw).ok_or_else(|| TableError::InvalidArraysize {
                field: field.name.clone(),
                arraysize: raw.to_string(),
            })?;
        }
        Ok(field)
    }

    pub fn with_arraysize(mut self, arraysize: ArraySize) -> Self {
        self.arraysize = arraysize;
        self
    }

    pub fn with_null(mut self, sentinel: impl Into<String>) -> Self {
        self.set_null(sentinel.into());
        self
    }

    pub(crate) fn set_null(&mut self, sentinel: String) {
        let trimmed = sentinel.trim();
        self.null_int = parse_int(trimmed);
        self.null_float = trimmed.parse::<f64>().ok().filter(|f| !f.is_nan());
        self.null = Some(sentinel);
    }

    /// Whether a cell of this field holds an array rather than a scalar.
    /// Character data is always a single string.
    pub fn is_array(&self) -> bool {
        !self.datatype.is_text() && !self.arraysize.is_scalar()
    }

    pub(crate) fn is_null_int(&self, value: i64) -> bool {
        self.null_int == Some(value)
    }

    pub(crate) fn is_null_float(&self, value: f64) -> bool {
        self.null_float == Some(value)
    }

    pub(crate) fn is_null_text(&self, value: &str) -> bool {
        self.null.as_deref() == Some(value)
    }
}

/// Decimal or `0x` hexadecimal integer.
///
/// Hex digits are read as the 64-bit two's-complement pattern, so
/// `0x8000000000000000` is `i64::MIN`.
pub(crate) fn parse_int(token: &str) -> Option<i64> {
    let (negative, unsigned) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    match unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        Some(hex) => {
            let bits = u64::from_str_radix(hex, 16).ok()? as i64;
            Some(if negative { bits.wrapping_neg() } else { bits })
        }
        None => token.parse::<i64>().ok(),
    }
}
