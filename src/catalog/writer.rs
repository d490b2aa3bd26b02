//! Catalog writer: output tables derived from the source export.
//!
//! Untouched rows are copied as raw bytes from the source, so quoting, line
//! endings and column order survive exactly. Only rows whose description is
//! replaced are re-serialized.

use crate::checkpoint::write_atomically;
use crate::models::{QuoteStyle, Result, ScribeError};
use csv::ByteRecord;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// What happened while writing an output table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Data rows read from the source
    pub rows_read: usize,
    /// Data rows written to the destination
    pub rows_written: usize,
    /// Rows whose description was replaced
    pub rows_rewritten: usize,
}

/// What to do with one source row.
enum RowAction<'a> {
    Copy,
    Replace(&'a str),
    Drop,
}

/// Writer for rewritten exports and subset extracts.
pub struct CatalogWriter {
    key_column: String,
    description_column: String,
    quote_style: QuoteStyle,
}

impl CatalogWriter {
    pub fn new(key_column: &str, description_column: &str, quote_style: QuoteStyle) -> Self {
        Self {
            key_column: key_column.to_string(),
            description_column: description_column.to_string(),
            quote_style,
        }
    }

    /// Write `source` to `dest`, replacing the description of every row whose
    /// key has completed content. All other rows are byte-identical.
    pub fn write_rewritten(
        &self,
        source: &Path,
        dest: &Path,
        completed: &BTreeMap<String, String>,
    ) -> Result<WriteSummary> {
        let summary = self.transform(source, dest, |key| match completed.get(key) {
            Some(content) => RowAction::Replace(content),
            None => RowAction::Copy,
        })?;
        info!(
            rows = summary.rows_written,
            rewritten = summary.rows_rewritten,
            products = completed.len(),
            path = %dest.display(),
            "Wrote output table"
        );
        Ok(summary)
    }

    /// Write only the rows (including variants) whose key is in `keys`.
    pub fn write_extract(
        &self,
        source: &Path,
        dest: &Path,
        keys: &HashSet<String>,
    ) -> Result<WriteSummary> {
        let summary = self.transform(source, dest, |key| {
            if keys.contains(key) {
                RowAction::Copy
            } else {
                RowAction::Drop
            }
        })?;
        info!(
            rows = summary.rows_written,
            products = keys.len(),
            path = %dest.display(),
            "Wrote extract"
        );
        Ok(summary)
    }

    fn transform<'a, F>(&self, source: &Path, dest: &Path, action_for: F) -> Result<WriteSummary>
    where
        F: Fn(&str) -> RowAction<'a>,
    {
        let bytes = fs::read(source).map_err(|e| ScribeError::source_read(source, e.into()))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes.as_slice());
        let headers = reader
            .byte_headers()
            .map_err(|e| ScribeError::source_read(source, e))?
            .clone();
        let key_idx = find_column(&headers, &self.key_column, source)?;
        let desc_idx = find_column(&headers, &self.description_column, source)?;

        // Each record owns the bytes from its start up to the next record's start.
        let mut rows: Vec<(usize, RowAction<'a>, Option<ByteRecord>)> = Vec::new();
        let mut record = ByteRecord::new();
        while reader
            .read_byte_record(&mut record)
            .map_err(|e| ScribeError::source_read(source, e))?
        {
            let start = record.position().map_or(bytes.len(), |p| p.byte() as usize);
            let key = record
                .get(key_idx)
                .and_then(|k| std::str::from_utf8(k).ok())
                .map(str::trim)
                .unwrap_or_default();
            let action = action_for(key);
            let replaced = match action {
                RowAction::Replace(content) => Some(replace_field(&record, desc_idx, content)),
                _ => None,
            };
            rows.push((start, action, replaced));
        }

        let header_end = rows.first().map_or(bytes.len(), |(start, _, _)| *start);
        let mut summary = WriteSummary {
            rows_read: rows.len(),
            ..Default::default()
        };

        let mut out = Vec::with_capacity(bytes.len());
        out.extend_from_slice(&bytes[..header_end]);
        for (i, (start, action, replaced)) in rows.iter().enumerate() {
            let end = rows.get(i + 1).map_or(bytes.len(), |(next, _, _)| *next);
            let raw = &bytes[*start..end];
            match action {
                RowAction::Copy => {
                    out.extend_from_slice(raw);
                    summary.rows_written += 1;
                }
                RowAction::Replace(_) => {
                    let record = replaced.as_ref().ok_or_else(|| {
                        ScribeError::Internal("replacement record missing".to_string())
                    })?;
                    self.write_replacement(&mut out, raw, record)?;
                    summary.rows_written += 1;
                    summary.rows_rewritten += 1;
                }
                RowAction::Drop => {}
            }
        }

        write_atomically(dest, |writer| writer.write_all(&out))
            .map_err(|e| ScribeError::io(format!("writing {}", dest.display()), e))?;
        Ok(summary)
    }

    /// Serialize `record`, keeping the blank-line prefix and terminator of `raw`.
    fn write_replacement(&self, out: &mut Vec<u8>, raw: &[u8], record: &ByteRecord) -> Result<()> {
        let is_newline = |b: &u8| *b == b'\r' || *b == b'\n';
        let prefix_len = raw.iter().take_while(|b| is_newline(b)).count();
        let suffix_len = raw[prefix_len..]
            .iter()
            .rev()
            .take_while(|b| is_newline(b))
            .count();

        let mut writer = csv::WriterBuilder::new()
            .quote_style(self.quote_style.into())
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer
            .write_byte_record(record)
            .map_err(|e| ScribeError::Internal(format!("serializing row: {e}")))?;
        let mut line = writer
            .into_inner()
            .map_err(|e| ScribeError::Internal(format!("serializing row: {e}")))?;
        line.pop();

        out.extend_from_slice(&raw[..prefix_len]);
        out.extend_from_slice(&line);
        out.extend_from_slice(&raw[raw.len() - suffix_len..]);
        Ok(())
    }
}

fn find_column(headers: &ByteRecord, name: &str, source: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| {
            let h = h.strip_prefix(b"\xef\xbb\xbf".as_slice()).unwrap_or(h);
            h.trim_ascii() == name.as_bytes()
        })
        .ok_or_else(|| ScribeError::MissingColumn {
            path: source.to_path_buf(),
            column: name.to_string(),
        })
}

fn replace_field(record: &ByteRecord, idx: usize, content: &str) -> ByteRecord {
    let mut fields: Vec<&[u8]> = record.iter().collect();
    if fields.len() <= idx {
        fields.resize(idx + 1, b"");
    }
    fields[idx] = content.as_bytes();
    ByteRecord::from(fields)
}
