//! Streaming XML reader that builds a [`Table`] from a VOTable document.

use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;

use super::binary::{decode_base64, decode_rows};
use super::field::Field;
use super::tabledata::parse_cell;
use super::{Cell, Serialization, Table};
use crate::error::{TableError, TableResult};

static XML_DECLARED_ENCODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*<\?xml[^>]*?encoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#)
        .expect("static regex")
});

/// Decode raw document bytes to text.
///
/// A byte order mark wins, then the XML declaration's `encoding` label;
/// anything else is read as UTF-8.
pub fn decode_document(bytes: &[u8]) -> TableResult<Cow<'_, str>> {
    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        return Ok(encoding.decode_without_bom_handling(&bytes[bom_len..]).0);
    }

    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
    let encoding = match XML_DECLARED_ENCODING.captures(&head) {
        Some(caps) => {
            let label = &caps[1];
            encoding_rs::Encoding::for_label(label.as_bytes())
                .ok_or_else(|| TableError::Encoding(label.to_string()))?
        }
        None => encoding_rs::UTF_8,
    };
    Ok(encoding.decode_without_bom_handling(bytes).0)
}

/// Configurable VOTable reader.
#[derive(Debug, Clone, Default)]
pub struct VoTableReader {
    table_index: usize,
}

impl VoTableReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the `n`th TABLE of the document (zero-based, document order).
    pub fn table_index(mut self, n: usize) -> Self {
        self.table_index = n;
        self
    }

    pub fn read_path<P: AsRef<Path>>(&self, path: P) -> TableResult<Table> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.read_bytes(&bytes)
    }

    pub fn read_bytes(&self, bytes: &[u8]) -> TableResult<Table> {
        let text = decode_document(bytes)?;
        self.read_str(&text)
    }

    pub fn read_str(&self, text: &str) -> TableResult<Table> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);
        let mut builder = TableBuilder::new(self.table_index);

        loop {
            let event = reader.read_event().map_err(|e| TableError::Xml {
                position: reader.error_position() as u64,
                message: e.to_string(),
            })?;
            let position = reader.buffer_position() as u64;
            match event {
                Event::Start(e) => builder.open(&e, false, position)?,
                Event::Empty(e) => {
                    builder.open(&e, true, position)?;
                    builder.close(e.local_name().as_ref())?;
                }
                Event::End(e) => builder.close(e.local_name().as_ref())?,
                Event::Text(t) if builder.capturing() => {
                    let text = t.unescape().map_err(|e| xml_error(position, e))?;
                    builder.buffer.push_str(&text);
                }
                Event::CData(c) if builder.capturing() => {
                    builder.buffer.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        builder.finish()
    }
}

fn xml_error(position: u64, err: impl std::fmt::Display) -> TableError {
    TableError::Xml {
        position,
        message: err.to_string(),
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8], position: u64) -> TableResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| xml_error(position, err))?;
        if attr.key.local_name().as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| xml_error(position, err))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Description,
    Td,
    Stream,
    QueryError,
}

struct TableBuilder {
    wanted: usize,
    tables_seen: usize,
    in_target: bool,
    done: bool,
    name: Option<String>,
    fields: Vec<Field>,
    open_field: Option<Field>,
    capture: Option<Capture>,
    buffer: String,
    raw_row: Option<Vec<String>>,
    rows: Vec<Vec<Cell>>,
    serialization: Serialization,
}

impl TableBuilder {
    fn new(wanted: usize) -> Self {
        Self {
            wanted,
            tables_seen: 0,
            in_target: false,
            done: false,
            name: None,
            fields: Vec::new(),
            open_field: None,
            capture: None,
            buffer: String::new(),
            raw_row: None,
            rows: Vec::new(),
            serialization: Serialization::None,
        }
    }

    fn capturing(&self) -> bool {
        self.capture.is_some()
    }

    fn start_capture(&mut self, capture: Capture) {
        self.capture = Some(capture);
        self.buffer.clear();
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool, position: u64) -> TableResult<()> {
        let local = e.local_name();
        let local = local.as_ref();

        // TAP services report failures in an INFO element, usually without a TABLE.
        if local == b"INFO"
            && attribute(e, b"name", position)?.as_deref() == Some("QUERY_STATUS")
            && attribute(e, b"value", position)?.as_deref() == Some("ERROR")
        {
            if empty {
                return Err(TableError::QueryStatus("service reported an error".into()));
            }
            self.start_capture(Capture::QueryError);
            return Ok(());
        }

        if local == b"TABLE" {
            if !self.done && self.tables_seen == self.wanted {
                self.in_target = true;
                self.name = attribute(e, b"name", position)?;
            }
            self.tables_seen += 1;
            return Ok(());
        }
        if !self.in_target {
            return Ok(());
        }

        match local {
            b"FIELD" => {
                let name = match attribute(e, b"name", position)? {
                    Some(name) => name,
                    None => attribute(e, b"ID", position)?
                        .unwrap_or_else(|| format!("col{}", self.fields.len() + 1)),
                };
                let datatype = attribute(e, b"datatype", position)?;
                let arraysize = attribute(e, b"arraysize", position)?;
                let mut field = Field::from_attributes(name, datatype.as_deref(), arraysize.as_deref())?;
                field.id = attribute(e, b"ID", position)?;
                field.unit = attribute(e, b"unit", position)?;
                field.ucd = attribute(e, b"ucd", position)?;
                self.open_field = Some(field);
            }
            b"DESCRIPTION" if self.open_field.is_some() && !empty => {
                self.start_capture(Capture::Description);
            }
            b"VALUES" => {
                if let (Some(field), Some(null)) =
                    (self.open_field.as_mut(), attribute(e, b"null", position)?)
                {
                    field.set_null(null);
                }
            }
            b"TABLEDATA" => self.serialization = Serialization::TableData,
            b"BINARY" => self.serialization = Serialization::Binary,
            b"BINARY2" => self.serialization = Serialization::Binary2,
            b"FITS" => return Err(TableError::UnsupportedSerialization("FITS".into())),
            b"STREAM" => {
                if let Some(href) = attribute(e, b"href", position)? {
                    return Err(TableError::UnsupportedSerialization(format!(
                        "external STREAM href '{href}'"
                    )));
                }
                match attribute(e, b"encoding", position)?.as_deref() {
                    None | Some("base64") => {}
                    Some(other) => {
                        return Err(TableError::UnsupportedSerialization(format!(
                            "STREAM encoding '{other}'"
                        )))
                    }
                }
                self.start_capture(Capture::Stream);
            }
            b"TR" => self.raw_row = Some(Vec::new()),
            b"TD" if self.raw_row.is_some() => self.start_capture(Capture::Td),
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, local: &[u8]) -> TableResult<()> {
        if self.capture == Some(Capture::QueryError) && local == b"INFO" {
            let message = self.buffer.trim();
            let message = if message.is_empty() {
                "service reported an error"
            } else {
                message
            };
            return Err(TableError::QueryStatus(message.to_string()));
        }
        if local == b"TABLE" && self.in_target {
            self.in_target = false;
            self.done = true;
            return Ok(());
        }
        if !self.in_target {
            return Ok(());
        }

        match local {
            b"FIELD" => {
                if let Some(field) = self.open_field.take() {
                    self.fields.push(field);
                }
            }
            b"DESCRIPTION" if self.capture == Some(Capture::Description) => {
                if let Some(field) = self.open_field.as_mut() {
                    field.description = Some(self.buffer.trim().to_string());
                }
                self.capture = None;
            }
            b"TD" => {
                if let Some(row) = self.raw_row.as_mut() {
                    row.push(std::mem::take(&mut self.buffer));
                }
                self.capture = None;
            }
            b"TR" => {
                if let Some(raw) = self.raw_row.take() {
                    let row = self.parse_row(raw)?;
                    self.rows.push(row);
                }
            }
            b"STREAM" if self.capture == Some(Capture::Stream) => {
                self.capture = None;
                if self.fields.is_empty() {
                    return Err(TableError::NoFields);
                }
                let data = decode_base64(&self.buffer)?;
                let binary2 = self.serialization == Serialization::Binary2;
                let rows = decode_rows(&self.fields, &data, binary2)?;
                self.rows.extend(rows);
            }
            _ => {}
        }
        Ok(())
    }

    fn parse_row(&self, raw: Vec<String>) -> TableResult<Vec<Cell>> {
        let row = self.rows.len();
        if raw.len() != self.fields.len() {
            return Err(TableError::RowWidth {
                row,
                expected: self.fields.len(),
                found: raw.len(),
            });
        }
        self.fields
            .iter()
            .zip(&raw)
            .map(|(field, text)| parse_cell(field, text, row))
            .collect()
    }

    fn finish(mut self) -> TableResult<Table> {
        if !self.done {
            return Err(TableError::NoTable(self.wanted));
        }
        if self.fields.is_empty() {
            return Err(TableError::NoFields);
        }
        dedupe_names(&mut self.fields);
        Ok(Table {
            name: self.name,
            fields: self.fields,
            rows: self.rows,
            serialization: self.serialization,
        })
    }
}

/// Repeated column names get a `_<k>` suffix so JSON keys stay unique.
fn dedupe_names(fields: &mut [Field]) {
    let mut seen = HashSet::new();
    for field in fields.iter_mut() {
        if seen.insert(field.name.clone()) {
            continue;
        }
        let mut k = 1;
        let renamed = loop {
            let candidate = format!("{}_{}", field.name, k);
            if seen.insert(candidate.clone()) {
                break candidate;
            }
            k += 1;
        };
        field.name = renamed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::votable::binary::tests::encode_row;
    use crate::votable::tests::GAIA_TWO_ROWS;
    use crate::votable::{Datatype, MaskFill};
    use base64::Engine;

    #[test]
    fn test_tabledata_document() {
        let table = VoTableReader::new().read_str(GAIA_TWO_ROWS).unwrap();
        assert_eq!(table.name.as_deref(), Some("gaia_source"));
        assert_eq!(table.serialization, Serialization::TableData);
        assert_eq!(table.fields.len(), 7);
        assert_eq!(table.fields[1].unit.as_deref(), Some("mag"));
        assert_eq!(table.fields[0].datatype, Datatype::Long);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1][0], Cell::Int(2));
        assert_eq!(table.rows[1][6], Cell::Float(2.5));
    }

    #[test]
    fn test_binary2_document() {
        let mut data = Vec::new();
        data.push(0);
        encode_row(&mut data, 5, 12.25, "DR3");
        data.push(0b1000_0000);
        encode_row(&mut data, 0, 13.5, "DR3");
        let stream = base64::engine::general_purpose::STANDARD.encode(&data);

        let doc = format!(
            r#"<VOTABLE><RESOURCE><TABLE>
                <FIELD name="source_id" datatype="long"/>
                <FIELD name="mag_g" datatype="float"/>
                <FIELD name="release" datatype="char" arraysize="*"/>
                <DATA><BINARY2><STREAM encoding="base64">{stream}</STREAM></BINARY2></DATA>
            </TABLE></RESOURCE></VOTABLE>"#
        );
        let table = VoTableReader::new().read_str(&doc).unwrap();
        assert_eq!(table.serialization, Serialization::Binary2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0][0], Cell::Int(5));
        assert_eq!(table.rows[1][0], Cell::Masked);
        assert_eq!(table.row_json(1, MaskFill::Null)["release"], "DR3");
    }

    #[test]
    fn test_field_metadata_and_namespaces() {
        let doc = r#"<vot:VOTABLE xmlns:vot="http://www.ivoa.net/xml/VOTable/v1.3">
          <vot:RESOURCE><vot:TABLE>
            <vot:FIELD ID="ra_id" datatype="double" ucd="pos.eq.ra">
              <vot:DESCRIPTION>Right ascension &amp; epoch</vot:DESCRIPTION>
              <vot:VALUES null="-999"/>
            </vot:FIELD>
            <vot:DATA><vot:TABLEDATA><vot:TR><vot:TD>-999</vot:TD></vot:TR></vot:TABLEDATA></vot:DATA>
          </vot:TABLE></vot:RESOURCE></vot:VOTABLE>"#;
        let table = parse_doc(doc);
        let field = &table.fields[0];
        assert_eq!(field.name, "ra_id");
        assert_eq!(field.ucd.as_deref(), Some("pos.eq.ra"));
        assert_eq!(field.description.as_deref(), Some("Right ascension & epoch"));
        assert_eq!(table.rows[0][0], Cell::Masked);
    }

    #[test]
    fn test_long_min_null_sentinel() {
        let doc = r#"<VOTABLE><RESOURCE><TABLE>
            <FIELD name="source_id" datatype="long"><VALUES null="-9223372036854775808"/></FIELD>
            <DATA><TABLEDATA>
              <TR><TD>-9223372036854775808</TD></TR>
              <TR><TD>-9223372036854775807</TD></TR>
            </TABLEDATA></DATA>
          </TABLE></RESOURCE></VOTABLE>"#;
        let table = parse_doc(doc);
        assert_eq!(table.rows[0][0], Cell::Masked);
        assert_eq!(table.rows[1][0], Cell::Int(i64::MIN + 1));
    }

    #[test]
    fn test_selects_table_by_index() {
        let doc = r#"<VOTABLE><RESOURCE>
            <TABLE name="first"><FIELD name="a" datatype="int"/></TABLE>
            <TABLE name="second"><FIELD name="b" datatype="int"/>
              <DATA><TABLEDATA><TR><TD>9</TD></TR></TABLEDATA></DATA></TABLE>
          </RESOURCE></VOTABLE>"#;
        let first = VoTableReader::new().read_str(doc).unwrap();
        assert_eq!(first.name.as_deref(), Some("first"));
        assert!(first.is_empty());

        let second = VoTableReader::new().table_index(1).read_str(doc).unwrap();
        assert_eq!(second.name.as_deref(), Some("second"));
        assert_eq!(second.rows[0][0], Cell::Int(9));

        let err = VoTableReader::new().table_index(2).read_str(doc).unwrap_err();
        assert!(matches!(err, TableError::NoTable(2)));
    }

    #[test]
    fn test_duplicate_names_are_suffixed() {
        let doc = r#"<VOTABLE><RESOURCE><TABLE>
            <FIELD name="mag" datatype="float"/>
            <FIELD name="mag" datatype="float"/>
            <FIELD datatype="float"/>
          </TABLE></RESOURCE></VOTABLE>"#;
        let table = parse_doc(doc);
        let names: Vec<&str> = table.column_names().collect();
        assert_eq!(names, vec!["mag", "mag_1", "col3"]);
    }

    #[test]
    fn test_query_status_error() {
        let doc = r#"<VOTABLE><RESOURCE type="results">
            <INFO name="QUERY_STATUS" value="ERROR">Unknown table gaiadr9.gaia_source</INFO>
          </RESOURCE></VOTABLE>"#;
        let err = VoTableReader::new().read_str(doc).unwrap_err();
        assert!(matches!(err, TableError::QueryStatus(ref m) if m.contains("gaiadr9")));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(
            VoTableReader::new().read_str("<VOTABLE><RESOURCE></VOTABLE>").unwrap_err(),
            TableError::Xml { .. }
        ));
        assert!(matches!(
            VoTableReader::new().read_str("<VOTABLE/>").unwrap_err(),
            TableError::NoTable(0)
        ));
        assert!(matches!(
            VoTableReader::new()
                .read_str("<VOTABLE><RESOURCE><TABLE/></RESOURCE></VOTABLE>")
                .unwrap_err(),
            TableError::NoFields
        ));
    }

    #[test]
    fn test_short_row_rejected() {
        let doc = r#"<VOTABLE><RESOURCE><TABLE>
            <FIELD name="a" datatype="int"/><FIELD name="b" datatype="int"/>
            <DATA><TABLEDATA><TR><TD>1</TD></TR></TABLEDATA></DATA>
          </TABLE></RESOURCE></VOTABLE>"#;
        let err = VoTableReader::new().read_str(doc).unwrap_err();
        assert!(matches!(err, TableError::RowWidth { row: 0, expected: 2, found: 1 }));
    }

    #[test]
    fn test_unsupported_serializations() {
        let fits = r#"<VOTABLE><RESOURCE><TABLE><FIELD name="a" datatype="int"/>
            <DATA><FITS><STREAM href="file:data.fits"/></FITS></DATA></TABLE></RESOURCE></VOTABLE>"#;
        assert!(matches!(
            VoTableReader::new().read_str(fits).unwrap_err(),
            TableError::UnsupportedSerialization(_)
        ));

        let gzip = r#"<VOTABLE><RESOURCE><TABLE><FIELD name="a" datatype="int"/>
            <DATA><BINARY><STREAM encoding="gzip">AAAA</STREAM></BINARY></DATA></TABLE></RESOURCE></VOTABLE>"#;
        let err = VoTableReader::new().read_str(gzip).unwrap_err();
        assert!(err.to_string().contains("gzip"));
    }

    #[test]
    fn test_latin1_declared_encoding() {
        let mut doc = br#"<?xml version="1.0" encoding="ISO-8859-1"?>
<VOTABLE><RESOURCE><TABLE><FIELD name="name" datatype="char" arraysize="*"/>
<DATA><TABLEDATA><TR><TD>"#
            .to_vec();
        doc.push(0xE9); // é
        doc.extend_from_slice(b"toile</TD></TR></TABLEDATA></DATA></TABLE></RESOURCE></VOTABLE>");

        let table = VoTableReader::new().read_bytes(&doc).unwrap();
        assert_eq!(table.rows[0][0], Cell::Text("étoile".into()));
    }

    #[test]
    fn test_unknown_declared_encoding() {
        let doc = br#"<?xml version="1.0" encoding="x-made-up"?><VOTABLE/>"#;
        assert!(matches!(
            decode_document(doc).unwrap_err(),
            TableError::Encoding(ref label) if label == "x-made-up"
        ));
    }

    fn parse_doc(doc: &str) -> Table {
        VoTableReader::new().read_str(doc).unwrap()
    }
}
