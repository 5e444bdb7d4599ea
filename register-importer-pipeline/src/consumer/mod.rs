//! Reading source files into raw rows.
//!
//! A source file is a byte payload plus a declared dialect and encoding.
//! Decoding is exact, never lossy: a byte sequence that is not valid in
//! the declared encoding fails the file rather than silently mangling a
//! name. Rows come out as untyped [`SourceRecord`]s in a single pass.

use std::io::Cursor;

use register_importer_shared::types::{CsvDialect, SourceEncoding, SourceRecord};
use tracing::{error, warn};

use crate::errors::ConsumerError;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Single-pass reader over one source file's rows.
pub struct FeedRows {
    file: String,
    headers: Vec<String>,
    reader: csv::Reader<Cursor<Vec<u8>>>,
    strict: bool,
    record: csv::StringRecord,
}

impl FeedRows {
    pub fn new(
        file: &str,
        bytes: &[u8],
        dialect: CsvDialect,
        encoding: SourceEncoding,
        strict: bool,
    ) -> Result<Self, ConsumerError> {
        let text = decode(file, bytes, encoding)?;

        let mut builder = csv::ReaderBuilder::new();
        builder.delimiter(dialect.delimiter).flexible(true);
        match dialect.quote {
            Some(quote) => builder.quote(quote),
            None => builder.quoting(false),
        };
        builder.escape(dialect.escape);
        let mut reader = builder.from_reader(Cursor::new(text.into_bytes()));

        let headers = reader
            .headers()
            .map_err(|source| ConsumerError::Csv {
                file: file.to_string(),
                source,
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        Ok(Self {
            file: file.to_string(),
            headers,
            reader,
            strict,
            record: csv::StringRecord::new(),
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl Iterator for FeedRows {
    type Item = Result<SourceRecord, ConsumerError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(source) => {
                return Some(Err(ConsumerError::Csv {
                    file: self.file.clone(),
                    source,
                }));
            }
        }

        let line = self
            .record
            .position()
            .map(|p| p.line())
            .unwrap_or_default();
        if self.record.len() != self.headers.len() {
            if self.strict {
                error!(
                    file = self.file,
                    line,
                    row = ?self.record,
                    "row width does not match header"
                );
                return Some(Err(ConsumerError::ColumnCountMismatch {
                    file: self.file.clone(),
                    line,
                    expected: self.headers.len(),
                    found: self.record.len(),
                }));
            }
            warn!(
                file = self.file,
                line,
                expected = self.headers.len(),
                found = self.record.len(),
                "row width does not match header, padding"
            );
        }

        let row = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                (
                    header.clone(),
                    self.record.get(i).unwrap_or_default().to_string(),
                )
            })
            .collect();
        Some(Ok(row))
    }
}

fn decode(file: &str, bytes: &[u8], encoding: SourceEncoding) -> Result<String, ConsumerError> {
    match encoding {
        SourceEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        SourceEncoding::Utf8 | SourceEncoding::Utf8Bom => {
            let stripped = if encoding == SourceEncoding::Utf8Bom {
                bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
            } else {
                bytes
            };
            String::from_utf8(stripped.to_vec()).map_err(|e| ConsumerError::Encoding {
                file: file.to_string(),
                encoding: "utf-8",
                offset: e.utf8_error().valid_up_to(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(rows: FeedRows) -> Vec<SourceRecord> {
        rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn reads_comma_separated_rows() {
        let bytes = b"Charity Number,Charity Name\nSC000001,\"Anchor, The\"\nSC000002,Plain Name\n";
        let rows = FeedRows::new(
            "register.csv",
            bytes,
            CsvDialect::COMMA,
            SourceEncoding::Utf8,
            true,
        )
        .unwrap();
        assert_eq!(rows.headers(), ["Charity Number", "Charity Name"]);
        let rows = collect(rows);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Charity Name"), Some("Anchor, The"));
    }

    #[test]
    fn reads_unquoted_tab_rows() {
        // quoting disabled, a double quote is data
        let bytes = b"regno\tname\n200001\tThe \"Anchor\" Trust\n";
        let rows = collect(
            FeedRows::new(
                "extract_charity.txt",
                bytes,
                CsvDialect::TAB_UNQUOTED,
                SourceEncoding::Utf8,
                true,
            )
            .unwrap(),
        );
        assert_eq!(rows[0].get("name"), Some("The \"Anchor\" Trust"));
    }

    #[test]
    fn strict_width_mismatch_is_fatal() {
        let bytes = b"regno\tname\taob\n200001\tShort Row\n";
        let mut rows = FeedRows::new(
            "extract_charity.txt",
            bytes,
            CsvDialect::TAB_UNQUOTED,
            SourceEncoding::Utf8,
            true,
        )
        .unwrap();
        let err = rows.next().unwrap().unwrap_err();
        match err {
            ConsumerError::ColumnCountMismatch {
                expected, found, ..
            } => {
                assert_eq!(expected, 3);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn lenient_width_mismatch_pads_with_empty() {
        let bytes = b"Charity Number,Website\nSC000001\n";
        let rows = collect(
            FeedRows::new(
                "register.csv",
                bytes,
                CsvDialect::COMMA,
                SourceEncoding::Utf8,
                false,
            )
            .unwrap(),
        );
        assert_eq!(rows[0].get("Website"), Some(""));
    }

    #[test]
    fn latin1_bytes_decode_exactly() {
        let bytes = b"Charity Name\nCaf\xe9 Trust\n";
        let rows = collect(
            FeedRows::new(
                "register.csv",
                bytes,
                CsvDialect::COMMA,
                SourceEncoding::Latin1,
                true,
            )
            .unwrap(),
        );
        assert_eq!(rows[0].get("Charity Name"), Some("Café Trust"));
    }

    #[test]
    fn invalid_utf8_fails_the_file() {
        let bytes = b"Charity Name\nCaf\xe9 Trust\n";
        match FeedRows::new(
            "register.csv",
            bytes,
            CsvDialect::COMMA,
            SourceEncoding::Utf8,
            true,
        ) {
            Err(ConsumerError::Encoding { offset, .. }) => assert_eq!(offset, 16),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("invalid utf-8 was accepted"),
        }
    }

    #[test]
    fn byte_order_mark_is_stripped_from_the_first_header() {
        let bytes = b"\xef\xbb\xbfpcds,lat\nAB1 0AA,57.1\n";
        let rows = FeedRows::new(
            "nspl.csv",
            bytes,
            CsvDialect::COMMA,
            SourceEncoding::Utf8Bom,
            true,
        )
        .unwrap();
        assert_eq!(rows.headers(), ["pcds", "lat"]);
    }
}
