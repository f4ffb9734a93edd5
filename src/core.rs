use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use memchr::memchr;

use crate::error::{Error, Result};
use crate::reader::Format;
use crate::records::{ColNames, Row};

/// Hook receiving the field slices and row number of every record whose
/// width does not match the column names (non-strict mode only). Called
/// synchronously from whichever thread drives the parser; must not call
/// back into the reader.
pub(crate) type BadRowFn = Box<dyn FnMut(&[&[u8]], u64) + Send>;

#[derive(Debug, Clone, Copy)]
enum ParseState {
    /// Outside any quoted region.
    Unquoted,
    /// Inside a quoted region.
    Quoted,
    /// Seen a quote inside a quoted region; the next byte decides whether
    /// it closed the region, escaped a literal quote, or was stray.
    ///
    /// Keeping this as a state instead of peeking ahead makes chunk
    /// boundaries transparent: the deciding byte may arrive in the next
    /// feed call.
    Quote,
}

/// The byte-stream state machine: consumes chunks of arbitrary size and
/// shape, emits finished rows into an internal queue.
///
/// Feeding a byte sequence split at any positions yields the same rows as
/// feeding it whole.
pub(crate) struct CoreParser {
    delimiter: u8,
    quote: u8,
    header_row: Option<usize>,
    strict: bool,
    explicit_names: bool,
    subset: Option<Vec<usize>>,

    // Full column set, used for width checks and subset projection.
    col_names: Arc<ColNames>,
    // Names attached to emitted rows (subset-projected when a mask is set).
    out_names: Arc<ColNames>,

    state: ParseState,
    // True at start-of-record and right after a delimiter: the only two
    // places a quote byte opens a quoted region.
    field_start: bool,
    // A bare CR terminates a record; this swallows the LF of a CRLF pair,
    // even when it arrives in the next chunk.
    skip_lf: bool,

    row_buf: Vec<u8>,
    splits: Vec<usize>,
    min_row_len: usize,

    row_num: u64,
    correct_rows: u64,

    bad_row: Option<BadRowFn>,
    records: VecDeque<Row>,
}

impl CoreParser {
    pub(crate) fn with_format(format: &Format) -> Self {
        let explicit_names = !format.col_names.is_empty();

        let mut parser = Self {
            delimiter: format.delimiter,
            quote: format.quote,
            header_row: format.header,
            strict: format.strict,
            explicit_names,
            subset: format.subset.clone(),
            col_names: Arc::new(ColNames::default()),
            out_names: Arc::new(ColNames::default()),
            state: ParseState::Unquoted,
            field_start: true,
            skip_lf: false,
            row_buf: Vec::new(),
            splits: Vec::new(),
            min_row_len: 0,
            row_num: 0,
            correct_rows: 0,
            bad_row: None,
            records: VecDeque::new(),
        };

        if explicit_names {
            parser.install_names(format.col_names.clone());
        }

        parser
    }

    /// Install the column set, normalizing the subset mask against it and
    /// deriving the names carried by emitted rows. Called exactly once per
    /// parser, either at construction or at the header row.
    fn install_names(&mut self, names: Vec<String>) {
        let full = Arc::new(ColNames::new(names));

        self.out_names = match &mut self.subset {
            Some(mask) => {
                mask.retain(|&i| i < full.len());

                Arc::new(ColNames::new(
                    mask.iter().map(|&i| full.names()[i].clone()).collect(),
                ))
            }
            None => Arc::clone(&full),
        };
        self.col_names = full;
    }

    #[inline]
    pub(crate) fn col_names(&self) -> &Arc<ColNames> {
        &self.out_names
    }

    #[inline]
    pub(crate) fn row_num(&self) -> u64 {
        self.row_num
    }

    #[inline]
    pub(crate) fn correct_rows(&self) -> u64 {
        self.correct_rows
    }

    pub(crate) fn set_bad_row_hook(&mut self, hook: BadRowFn) {
        self.bad_row = Some(hook);
    }

    #[inline]
    pub(crate) fn pop_row(&mut self) -> Option<Row> {
        self.records.pop_front()
    }

    #[inline]
    pub(crate) fn queued(&self) -> usize {
        self.records.len()
    }

    /// Consume one chunk. The chunk may start or stop anywhere, including
    /// inside a quoted region or between a CR and its LF.
    pub(crate) fn feed(&mut self, input: &[u8]) -> Result<()> {
        let input_len = input.len();
        let mut pos = 0;

        while pos < input_len {
            let byte = input[pos];

            if self.skip_lf {
                self.skip_lf = false;

                if byte == b'\n' {
                    pos += 1;
                    continue;
                }
            }

            match self.state {
                ParseState::Unquoted => {
                    pos += 1;

                    if byte == self.delimiter {
                        self.splits.push(self.row_buf.len());
                        self.field_start = true;
                    } else if byte == self.quote {
                        if self.field_start {
                            self.state = ParseState::Quoted;
                        } else {
                            // Lenient: a stray quote inside an unquoted
                            // field is kept as a literal.
                            self.row_buf.push(byte);
                        }

                        self.field_start = false;
                    } else if byte == b'\n' {
                        self.finalize_record()?;
                    } else if byte == b'\r' {
                        self.skip_lf = true;
                        self.finalize_record()?;
                    } else {
                        self.row_buf.push(byte);
                        self.field_start = false;
                    }
                }
                ParseState::Quoted => {
                    // Everything up to the next quote byte is literal,
                    // delimiters and newlines included.
                    match memchr(self.quote, &input[pos..]) {
                        Some(offset) => {
                            self.row_buf.extend_from_slice(&input[pos..pos + offset]);
                            pos += offset + 1;
                            self.state = ParseState::Quote;
                        }
                        None => {
                            self.row_buf.extend_from_slice(&input[pos..]);
                            pos = input_len;
                        }
                    }
                }
                ParseState::Quote => {
                    pos += 1;

                    if byte == self.quote {
                        // Doubled quote: one literal quote.
                        self.row_buf.push(byte);
                        self.state = ParseState::Quoted;
                    } else if byte == self.delimiter {
                        self.state = ParseState::Unquoted;
                        self.splits.push(self.row_buf.len());
                        self.field_start = true;
                    } else if byte == b'\n' {
                        self.state = ParseState::Unquoted;
                        self.finalize_record()?;
                    } else if byte == b'\r' {
                        self.state = ParseState::Unquoted;
                        self.skip_lf = true;
                        self.finalize_record()?;
                    } else {
                        // Lenient: a lone quote followed by ordinary data
                        // stays inside the quoted region.
                        self.row_buf.push(self.quote);
                        self.row_buf.push(byte);
                        self.state = ParseState::Quoted;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal end-of-input and finalize any in-flight record, so a trailing
    /// record without a line terminator is still emitted. Idempotent.
    pub(crate) fn end_feed(&mut self) -> Result<()> {
        if matches!(self.state, ParseState::Quote) {
            // A quote at the very end of the stream closes its region.
            self.state = ParseState::Unquoted;
        }
        self.skip_lf = false;

        if !self.row_buf.is_empty() || !self.splits.is_empty() {
            self.finalize_record()?;
        }

        Ok(())
    }

    fn finalize_record(&mut self) -> Result<()> {
        // Commit the in-flight field, if any bytes accumulated past the
        // last split.
        let last_split = self.splits.last().copied().unwrap_or(0);
        if self.row_buf.len() > last_split {
            self.splits.push(self.row_buf.len());
        }

        if let Some(header) = self.header_row {
            if (self.row_num as usize) < header {
                // Pre-header content, counted but discarded.
                self.reset_record(false);
                self.row_num += 1;
                return Ok(());
            }

            if self.row_num as usize == header {
                if !self.explicit_names {
                    let names = self
                        .field_slices()
                        .iter()
                        .map(|cell| String::from_utf8_lossy(cell).into_owned())
                        .collect();
                    self.install_names(names);
                }

                self.reset_record(false);
                self.row_num += 1;
                return Ok(());
            }
        }

        let expected = self.col_names.len();

        // Files omitting the trailing delimiter on an empty last field:
        // exactly one missing field gets padded with an empty one.
        if self.splits.len() + 1 == expected {
            self.splits.push(self.row_buf.len());
        }

        if self.splits.len() == expected {
            let record_len = self.row_buf.len();
            if record_len > 0 {
                self.min_row_len = if self.min_row_len == 0 {
                    record_len
                } else {
                    self.min_row_len.min(record_len)
                };
            }

            let buf = mem::take(&mut self.row_buf);
            let splits = mem::take(&mut self.splits);

            let (buf, splits) = match &self.subset {
                Some(mask) => project(buf, splits, mask),
                None => (buf, splits),
            };

            self.records
                .push_back(Row::new(buf, splits, Arc::clone(&self.out_names)));
            self.correct_rows += 1;
            self.reset_record(true);
            self.row_num += 1;

            return Ok(());
        }

        if self.strict {
            let err = Error::malformed_row(self.row_num, expected, self.splits.len());
            self.reset_record(false);
            self.row_num += 1;

            return Err(err);
        }

        if let Some(mut hook) = self.bad_row.take() {
            let fields = self.field_slices();
            hook(&fields, self.row_num);
            self.bad_row = Some(hook);
        }

        self.reset_record(false);
        self.row_num += 1;

        Ok(())
    }

    /// Slices of the fields collected so far, in source order.
    fn field_slices(&self) -> Vec<&[u8]> {
        let mut start = 0;

        self.splits
            .iter()
            .map(|&end| {
                let cell = &self.row_buf[start..end];
                start = end;
                cell
            })
            .collect()
    }

    fn reset_record(&mut self, taken: bool) {
        if taken {
            // The buffers moved into the emitted row; seed the fresh one
            // with the smallest record length seen so far.
            self.row_buf = Vec::with_capacity(self.min_row_len);
        } else {
            self.row_buf.clear();
            self.splits.clear();
        }

        self.state = ParseState::Unquoted;
        self.field_start = true;
    }
}

/// Project an accepted record through the subset mask, keeping the single
/// buffer plus end-offsets shape.
fn project(buf: Vec<u8>, splits: Vec<usize>, mask: &[usize]) -> (Vec<u8>, Vec<usize>) {
    let mut out_buf = Vec::with_capacity(buf.len());
    let mut out_splits = Vec::with_capacity(mask.len());

    for &i in mask {
        let start = if i == 0 { 0 } else { splits[i - 1] };
        let end = splits[i];

        out_buf.extend_from_slice(&buf[start..end]);
        out_splits.push(out_buf.len());
    }

    (out_buf, out_splits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::reader::Format;

    fn comma_format() -> Format {
        Format::new()
    }

    fn drain(parser: &mut CoreParser) -> Vec<Vec<String>> {
        let mut rows = Vec::new();

        while let Some(row) = parser.pop_row() {
            rows.push(row.to_vec());
        }

        rows
    }

    fn parse_whole(format: &Format, data: &[u8]) -> (Vec<Vec<String>>, u64, u64) {
        let mut parser = CoreParser::with_format(format);
        parser.feed(data).unwrap();
        parser.end_feed().unwrap();

        let (row_num, correct) = (parser.row_num(), parser.correct_rows());
        (drain(&mut parser), row_num, correct)
    }

    #[test]
    fn test_basic_parse_with_header() {
        let data = b"A,B,C\r\n123,234,345\r\n1,2,3\r\n1,2,3";
        let (rows, row_num, correct) = parse_whole(&comma_format(), data);

        assert_eq!(
            rows,
            vec![
                vec!["123", "234", "345"],
                vec!["1", "2", "3"],
                vec!["1", "2", "3"],
            ]
        );
        assert_eq!(row_num, 4);
        assert_eq!(correct, 3);

        let mut parser = CoreParser::with_format(&comma_format());
        parser.feed(data).unwrap();
        parser.end_feed().unwrap();
        assert_eq!(parser.col_names().names(), &["A", "B", "C"]);

        let row = parser.pop_row().unwrap();
        let field = row.field_by_name("A").unwrap();
        assert_eq!(field.get_i64().unwrap(), 123);
    }

    #[test]
    fn test_quoted_fields() {
        let data = b"a,b\n\"hello, world\",42\n\"she said \"\"hi\"\"\",7\n";
        let (rows, _, correct) = parse_whole(&comma_format(), data);

        assert_eq!(
            rows,
            vec![
                vec!["hello, world", "42"],
                vec!["she said \"hi\"", "7"],
            ]
        );
        assert_eq!(correct, 2);
    }

    #[test]
    fn test_quoted_newline() {
        let data = b"id,note\n1,\"line1\nline2\"\n2,ok\n";
        let (rows, _, correct) = parse_whole(&comma_format(), data);

        assert_eq!(rows, vec![vec!["1", "line1\nline2"], vec!["2", "ok"]]);
        assert_eq!(correct, 2);
    }

    #[test]
    fn test_line_terminators_are_equivalent() {
        let lf = b"a,b\n1,2\n3,4\n".to_vec();
        let crlf = b"a,b\r\n1,2\r\n3,4\r\n".to_vec();
        let cr = b"a,b\r1,2\r3,4\r".to_vec();

        let mut outputs = Vec::new();
        for data in [lf, crlf, cr] {
            let (rows, row_num, correct) = parse_whole(&comma_format(), &data);
            outputs.push((rows, row_num, correct));
        }

        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[0], outputs[2]);
        assert_eq!(outputs[0].0, vec![vec!["1", "2"], vec!["3", "4"]]);
    }

    #[test]
    fn test_trailing_record_without_terminator() {
        let (rows, _, correct) = parse_whole(&comma_format(), b"a,b\n1,2");

        assert_eq!(rows, vec![vec!["1", "2"]]);
        assert_eq!(correct, 1);
    }

    #[test]
    fn test_chunk_boundaries_are_transparent() {
        let data = b"A,B,C\r\n123,234,345\r\n1,2,3\r\n1,2,3";
        let (expected, expected_row_num, expected_correct) =
            parse_whole(&comma_format(), data);

        // The spec's canonical splits, then every possible single split,
        // then exhaustive byte-at-a-time feeding.
        let mut partitions: Vec<Vec<&[u8]>> = vec![vec![&data[..3], &data[3..8], &data[8..17], &data[17..]]];
        for i in 1..data.len() {
            partitions.push(vec![&data[..i], &data[i..]]);
        }
        partitions.push(data.iter().map(std::slice::from_ref).collect());

        for parts in partitions {
            let mut parser = CoreParser::with_format(&comma_format());
            for part in parts {
                parser.feed(part).unwrap();
            }
            parser.end_feed().unwrap();

            assert_eq!(parser.row_num(), expected_row_num);
            assert_eq!(parser.correct_rows(), expected_correct);
            assert_eq!(drain(&mut parser), expected);
        }
    }

    #[test]
    fn test_chunked_quotes_and_crlf() {
        let data = b"a,b\r\n\"x\"\"y\",\"1\r\n2\"\r\nplain,\"q\"\r\n";
        let (expected, _, _) = parse_whole(&comma_format(), data);

        assert_eq!(
            expected,
            vec![vec!["x\"y", "1\r\n2"], vec!["plain", "q"]]
        );

        let mut parser = CoreParser::with_format(&comma_format());
        for byte in data {
            parser.feed(std::slice::from_ref(byte)).unwrap();
        }
        parser.end_feed().unwrap();

        assert_eq!(drain(&mut parser), expected);
    }

    #[test]
    fn test_one_missing_trailing_field_is_padded() {
        let data = b"a,b,c\n1,2,\n3,4\n5,6,7\n";
        let (rows, _, correct) = parse_whole(&comma_format(), data);

        assert_eq!(
            rows,
            vec![vec!["1", "2", ""], vec!["3", "4", ""], vec!["5", "6", "7"]]
        );
        assert_eq!(correct, 3);
    }

    #[test]
    fn test_short_and_long_rows_are_dropped() {
        let data = b"a,b,c\n1\n1,2,3\n1,2,3,4\n";
        let (rows, row_num, correct) = parse_whole(&comma_format(), data);

        assert_eq!(rows, vec![vec!["1", "2", "3"]]);
        assert_eq!(row_num, 4);
        assert_eq!(correct, 1);
    }

    #[test]
    fn test_bad_row_hook() {
        use std::sync::{Arc, Mutex};

        let seen: Arc<Mutex<Vec<(Vec<String>, u64)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut format = Format::new();
        format.delimiter(b',');

        let mut parser = CoreParser::with_format(&format);
        parser.set_bad_row_hook(Box::new(move |fields, row| {
            let fields = fields
                .iter()
                .map(|cell| String::from_utf8_lossy(cell).into_owned())
                .collect();
            sink.lock().unwrap().push((fields, row));
        }));

        parser.feed(b"a,b,c\n1,2,3\nonly-one\n4,5,6\n").unwrap();
        parser.end_feed().unwrap();

        assert_eq!(parser.correct_rows(), 2);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (vec!["only-one".to_string()], 2));
    }

    #[test]
    fn test_strict_mode_raises() {
        let mut format = Format::new();
        format.strict(true);

        let mut parser = CoreParser::with_format(&format);
        let err = parser.feed(b"a,b,c\n1,2,3\nonly-one\n").unwrap_err();

        match err.kind() {
            ErrorKind::MalformedRow { row, expected, got } => {
                assert_eq!(*row, 2);
                assert_eq!(*expected, 3);
                assert_eq!(*got, 1);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_header_row_offset() {
        let mut format = Format::new();
        format.header_row(Some(2));

        let data = b"junk\nmore junk\na,b\n1,2\n";
        let mut parser = CoreParser::with_format(&format);
        parser.feed(data).unwrap();
        parser.end_feed().unwrap();

        assert_eq!(parser.col_names().names(), &["a", "b"]);
        assert_eq!(parser.row_num(), 4);
        assert_eq!(parser.correct_rows(), 1);
        assert_eq!(drain(&mut parser), vec![vec!["1", "2"]]);
    }

    #[test]
    fn test_explicit_col_names() {
        let mut format = Format::new();
        format.col_names(["A", "B", "C"]);

        let mut parser = CoreParser::with_format(&format);
        parser.feed(b"123,234,345\r\n1,2,3\r\n1,2,3").unwrap();
        parser.end_feed().unwrap();

        assert_eq!(parser.col_names().names(), &["A", "B", "C"]);
        assert_eq!(parser.correct_rows(), 3);

        let row = parser.pop_row().unwrap();
        assert_eq!(row.to_vec(), vec!["123", "234", "345"]);
        assert_eq!(&row["B"], b"234");
    }

    #[test]
    fn test_subset_projection() {
        let mut format = Format::new();
        format.subset(&[2, 0]);

        let mut parser = CoreParser::with_format(&format);
        parser.feed(b"a,b,c\n1,2,3\n4,5,6\n").unwrap();
        parser.end_feed().unwrap();

        assert_eq!(parser.col_names().names(), &["c", "a"]);

        let rows = drain(&mut parser);
        assert_eq!(rows, vec![vec!["3", "1"], vec!["6", "4"]]);

        let mut parser = CoreParser::with_format(&format);
        parser.feed(b"a,b,c\n1,2,3\n").unwrap();
        parser.end_feed().unwrap();

        let row = parser.pop_row().unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(&row["a"], b"1");
        assert_eq!(&row["c"], b"3");
    }

    #[test]
    fn test_empty_input() {
        let (rows, row_num, correct) = parse_whole(&comma_format(), b"");

        assert!(rows.is_empty());
        assert_eq!(row_num, 0);
        assert_eq!(correct, 0);

        let mut parser = CoreParser::with_format(&comma_format());
        parser.end_feed().unwrap();
        assert!(parser.col_names().is_empty());
    }

    #[test]
    fn test_header_only_input() {
        let mut parser = CoreParser::with_format(&comma_format());
        parser.feed(b"a,b,c\n").unwrap();
        parser.end_feed().unwrap();

        assert_eq!(parser.col_names().names(), &["a", "b", "c"]);
        assert_eq!(parser.correct_rows(), 0);
        assert!(parser.pop_row().is_none());
    }

    #[test]
    fn test_stray_quote_is_literal() {
        let (rows, _, _) = parse_whole(&comma_format(), b"a,b\nab\"cd,2\n");

        assert_eq!(rows, vec![vec!["ab\"cd", "2"]]);
    }

    #[test]
    fn test_lone_quote_inside_quoted_field() {
        // A lone quote followed by ordinary data does not close the region.
        let (rows, _, _) = parse_whole(&comma_format(), b"a,b\n\"23\"45\",6\n");

        assert_eq!(rows, vec![vec!["23\"45", "6"]]);
    }

    #[test]
    fn test_blank_lines_count_as_bad_rows() {
        let data = b"a,b\n1,2\n\n3,4\n";
        let (rows, row_num, correct) = parse_whole(&comma_format(), data);

        assert_eq!(rows, vec![vec!["1", "2"], vec!["3", "4"]]);
        assert_eq!(row_num, 4);
        assert_eq!(correct, 2);
    }

    #[test]
    fn test_end_feed_is_idempotent() {
        let mut parser = CoreParser::with_format(&comma_format());
        parser.feed(b"a,b\n1,2").unwrap();
        parser.end_feed().unwrap();
        parser.end_feed().unwrap();

        assert_eq!(parser.correct_rows(), 1);
        assert_eq!(drain(&mut parser), vec![vec!["1", "2"]]);
    }
}
