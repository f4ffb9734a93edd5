use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::CoreParser;
use crate::error::Result;
use crate::guess;
use crate::pipeline;
use crate::records::Row;

/// How many source lines a lazy iteration pass pulls through the pipeline
/// before handing control back to the consumer.
pub(crate) const ITERATION_CHUNK_SIZE: u64 = 100_000;

/// Parsing configuration: delimiter, quote, header row, explicit column
/// names, strictness and an optional column subset.
///
/// ```no_run
/// use sift_csv::{Format, Reader};
///
/// let mut format = Format::new();
/// format.delimiter(b'|').header_row(Some(3));
///
/// let reader = Reader::from_path_with("data.psv", &format).unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct Format {
    pub(crate) delimiter: u8,
    pub(crate) quote: u8,
    pub(crate) header: Option<usize>,
    pub(crate) col_names: Vec<String>,
    pub(crate) strict: bool,
    pub(crate) subset: Option<Vec<usize>>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            header: Some(0),
            col_names: Vec::new(),
            strict: false,
            subset: None,
        }
    }
}

impl Format {
    /// Comma-delimited, double-quoted, header on the first row, non-strict.
    pub fn new() -> Self {
        Self::default()
    }

    /// A format whose delimiter and header row are autodetected when a
    /// reader is opened from a path. This is what [`Reader::from_path`]
    /// uses.
    pub fn sniff() -> Self {
        let mut format = Self::default();
        format.delimiter = 0;
        format
    }

    /// Set the field delimiter. A zero byte requests autodetection.
    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the quote byte. Defaults to a double quote.
    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.quote = quote;
        self
    }

    /// Set the zero-based row carrying the column names; `None` means the
    /// input has no header row. Rows before the header are discarded.
    pub fn header_row(&mut self, row: Option<usize>) -> &mut Self {
        self.header = row;
        self
    }

    /// Supply the column names up front. This disables header-row
    /// interpretation, so data is read from the first row; call
    /// [`Format::header_row`] afterwards to also skip a header row whose
    /// names should be ignored.
    pub fn col_names<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.col_names = names.into_iter().map(Into::into).collect();
        self.header = None;
        self
    }

    /// Fail on malformed rows instead of skipping them.
    pub fn strict(&mut self, yes: bool) -> &mut Self {
        self.strict = yes;
        self
    }

    /// Retain only the given columns, in the given order.
    pub fn subset(&mut self, columns: &[usize]) -> &mut Self {
        self.subset = Some(columns.to_vec());
        self
    }

    pub fn get_delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn get_quote(&self) -> u8 {
        self.quote
    }

    pub fn get_header_row(&self) -> Option<usize> {
        self.header
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

/// The main entry point for parsing CSV data.
///
/// Rows can be read in two ways:
/// 1. from in-memory strings, using [`Reader::feed`] and
///    [`Reader::end_feed`] on a reader built with [`Reader::from_format`];
/// 2. from files, using [`Reader::from_path`]; disk reads then overlap
///    parsing on a worker thread, and rows are pulled lazily.
pub struct Reader {
    parser: Option<CoreParser>,
    input: Option<BufReader<File>>,
    format: Format,
    eof: bool,
}

impl Reader {
    /// Open a file, autodetecting its delimiter and header row.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_path_with(path, &Format::sniff())
    }

    /// Open a file with the given format. A zero delimiter runs the format
    /// guesser first and the reader adopts the guessed delimiter and header
    /// row.
    pub fn from_path_with<P: AsRef<Path>>(path: P, format: &Format) -> Result<Self> {
        let path = path.as_ref();
        let mut format = format.clone();

        if format.delimiter == 0 {
            let guessed = guess::guess_format(path)?;
            format.delimiter = guessed.delimiter;
            format.header = guessed.header;

            debug!(
                delimiter = %(guessed.delimiter as char),
                header = ?guessed.header,
                path = %path.display(),
                "autodetected format"
            );
        }

        let file = File::open(path)?;

        Ok(Self {
            parser: Some(CoreParser::with_format(&format)),
            input: Some(BufReader::new(file)),
            format,
            eof: false,
        })
    }

    /// A reader fed directly from memory: push text with [`Reader::feed`],
    /// then finish with [`Reader::end_feed`]. The pipeline is not engaged;
    /// parsing happens on the calling thread.
    pub fn from_format(format: &Format) -> Self {
        Self {
            parser: Some(CoreParser::with_format(format)),
            input: None,
            format: format.clone(),
            eof: false,
        }
    }

    /// Push a fragment of CSV text into the parser. Fragments may split
    /// records, quoted regions, even CRLF pairs.
    pub fn feed<T: AsRef<[u8]>>(&mut self, text: T) -> Result<()> {
        match self.parser.as_mut() {
            Some(parser) => parser.feed(text.as_ref()),
            None => Ok(()),
        }
    }

    /// Signal end-of-input, finalizing any in-flight record.
    pub fn end_feed(&mut self) -> Result<()> {
        match self.parser.as_mut() {
            Some(parser) => parser.end_feed(),
            None => Ok(()),
        }
    }

    /// Run one pipeline pass over at most `max_lines` source lines.
    pub(crate) fn sample(&mut self, max_lines: u64) -> Result<()> {
        self.fill(Some(max_lines))
    }

    fn fill(&mut self, max_lines: Option<u64>) -> Result<()> {
        if self.eof {
            return Ok(());
        }

        let Some(parser) = self.parser.take() else {
            return Ok(());
        };
        let Some(input) = self.input.as_mut() else {
            self.parser = Some(parser);
            return Ok(());
        };

        let (mut parser, eof, mut result) = pipeline::drive(input, parser, max_lines);

        self.eof = eof;

        if eof {
            if result.is_ok() {
                result = parser.end_feed();
            }
            // Drained: release the file handle.
            self.input = None;
        }

        self.parser = Some(parser);
        result
    }

    /// Pull the next row, lazily reading more of the underlying file when
    /// the local queue runs dry. Returns `None` once the reader is drained.
    pub fn read_row(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.parser.as_mut().and_then(CoreParser::pop_row) {
                return Ok(Some(row));
            }

            if self.eof || self.input.is_none() {
                return Ok(None);
            }

            self.fill(Some(ITERATION_CHUNK_SIZE))?;
        }
    }

    /// Pull the next row into a vector of owned strings. Returns `false`
    /// once the reader is drained.
    pub fn read_row_into(&mut self, out: &mut Vec<String>) -> Result<bool> {
        match self.read_row()? {
            Some(row) => {
                out.clear();
                out.extend(
                    row.iter()
                        .map(|cell| String::from_utf8_lossy(cell).into_owned()),
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Iterate over the remaining rows. Single-pass and forward-only:
    /// advancing may trigger file reads, and the iterator ends when the
    /// reader is drained.
    pub fn rows(&mut self) -> Rows<'_> {
        Rows { reader: self }
    }

    /// Like [`Reader::rows`], but consumes the reader.
    pub fn into_rows(self) -> IntoRows {
        IntoRows { reader: self }
    }

    /// The column names attached to emitted rows (subset-projected when a
    /// subset is configured). Empty until the header row has been parsed.
    pub fn col_names(&self) -> &[String] {
        match self.parser.as_ref() {
            Some(parser) => parser.col_names().names(),
            None => &[],
        }
    }

    /// Position of a column name, or `None` if no such column exists.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parser
            .as_ref()
            .and_then(|parser| parser.col_names().index_of(name))
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Total records finalized so far, header included.
    pub fn row_num(&self) -> u64 {
        self.parser.as_ref().map_or(0, CoreParser::row_num)
    }

    /// Records accepted into the output queue so far.
    pub fn correct_rows(&self) -> u64 {
        self.parser.as_ref().map_or(0, CoreParser::correct_rows)
    }

    /// Install the bad-row hook: called with the field slices and row
    /// number of every dropped record. The hook runs on the parsing thread
    /// and must not call back into this reader.
    pub fn on_bad_row<F>(&mut self, hook: F)
    where
        F: FnMut(&[&[u8]], u64) + Send + 'static,
    {
        if let Some(parser) = self.parser.as_mut() {
            parser.set_bad_row_hook(Box::new(hook));
        }
    }

    /// Release the file handle. Idempotent; queued rows stay readable.
    pub fn close(&mut self) {
        self.input = None;
    }

    /// True once the source is exhausted and every row has been pulled.
    pub fn is_drained(&self) -> bool {
        self.parser.as_ref().map_or(true, |p| p.queued() == 0)
            && (self.eof || self.input.is_none())
    }
}

pub struct Rows<'r> {
    reader: &'r mut Reader,
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

pub struct IntoRows {
    reader: Reader,
}

impl Iterator for IntoRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

/// Parse an in-memory string in one shot.
pub fn parse<T: AsRef<[u8]>>(text: T, format: &Format) -> Result<Vec<Row>> {
    let mut reader = Reader::from_format(format);

    reader.feed(text)?;
    reader.end_feed()?;

    let mut rows = Vec::new();
    while let Some(row) = reader.read_row()? {
        rows.push(row);
    }

    Ok(rows)
}

/// Summary of a CSV file: autodetected delimiter, column names and counts.
#[derive(Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub col_names: Vec<String>,
    pub delimiter: u8,
    pub n_rows: u64,
    pub n_cols: usize,
}

/// Autodetect a file's format and scan it end to end.
pub fn get_file_info<P: AsRef<Path>>(path: P) -> Result<FileInfo> {
    let path = path.as_ref();
    let mut reader = Reader::from_path(path)?;

    while reader.read_row()?.is_some() {}

    Ok(FileInfo {
        path: path.to_path_buf(),
        col_names: reader.col_names().to_vec(),
        delimiter: reader.format().delimiter,
        n_rows: reader.correct_rows(),
        n_cols: reader.col_names().len(),
    })
}
