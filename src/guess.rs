use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::Result;
use crate::reader::{Format, Reader};

/// Delimiters the guesser considers, most common first.
const CANDIDATES: [u8; 5] = [b',', b'|', b'\t', b';', b'^'];

/// How many source lines each probe parses.
const SAMPLE_LINES: u64 = 100;

/// Accepted-row counts saturate here when scoring stage one.
const ROW_CAP: u64 = 100;

/// Guess a file's delimiter and header row.
///
/// Stage one parses a sample with each candidate delimiter, header on the
/// first row, and keeps the one accepting the most rows across the most
/// columns. When no candidate wins convincingly (typically files opening
/// with comment lines, where the would-be header is a comment), stage two
/// finds, per candidate, the dominant field count among rejected rows and
/// places the header at its first occurrence.
pub fn guess_format<P: AsRef<Path>>(path: P) -> Result<Format> {
    let path = path.as_ref();

    let (delimiter, rows, cols) = first_guess(path)?;

    let mut format = Format::new();

    if rows > 10 && cols > 2 {
        format.delimiter(delimiter).header_row(Some(0));
        debug!(delimiter = %(delimiter as char), rows, cols, "first-stage guess");

        return Ok(format);
    }

    match second_guess(path)? {
        Some((delimiter, header)) => {
            format.delimiter(delimiter).header_row(Some(header));
            debug!(delimiter = %(delimiter as char), header, "second-stage guess");
        }
        None => {
            // No candidate shows evidence of a rejected body; keep the
            // stage-one winner with the header on the first row.
            format.delimiter(delimiter).header_row(Some(0));
        }
    }

    Ok(format)
}

/// Stage one: winner by (accepted rows capped at 100, column count).
fn first_guess(path: &Path) -> Result<(u8, u64, usize)> {
    let mut best: Option<(u64, usize, u8)> = None;

    for &delimiter in CANDIDATES.iter() {
        let mut format = Format::new();
        format.delimiter(delimiter).header_row(Some(0));

        let mut reader = Reader::from_path_with(path, &format)?;
        reader.sample(SAMPLE_LINES)?;

        let rows = reader.correct_rows().min(ROW_CAP);
        let cols = reader.col_names().len();

        if best.map_or(true, |(r, c, _)| (rows, cols) > (r, c)) {
            best = Some((rows, cols, delimiter));
        }
    }

    // CANDIDATES is non-empty, so a best entry always exists.
    let (rows, cols, delimiter) = best.unwrap_or((0, 0, b','));

    Ok((delimiter, rows, cols))
}

#[derive(Default)]
struct RowTally {
    counts: HashMap<usize, u64>,
    first_seen: HashMap<usize, u64>,
}

/// Stage two: per candidate, tally the field counts of rejected rows. A
/// candidate whose dominant field count outnumbers its accepted rows is
/// evidence the real body was rejected under a wrong header; the header
/// belongs where that field count first appeared.
fn second_guess(path: &Path) -> Result<Option<(u8, usize)>> {
    let mut best: Option<(usize, u64, u8, u64)> = None;

    for &delimiter in CANDIDATES.iter() {
        let mut format = Format::new();
        format.delimiter(delimiter).header_row(Some(0));

        let mut reader = Reader::from_path_with(path, &format)?;

        let tally = Arc::new(Mutex::new(RowTally::default()));
        let sink = Arc::clone(&tally);

        reader.on_bad_row(move |fields, row| {
            let mut sink = sink.lock().unwrap();

            *sink.counts.entry(fields.len()).or_insert(0) += 1;
            sink.first_seen.entry(fields.len()).or_insert(row);
        });

        reader.sample(SAMPLE_LINES)?;

        let tally = tally.lock().unwrap();

        let Some((&fields, &count)) = tally.counts.iter().max_by_key(|&(&k, &v)| (v, k)) else {
            continue;
        };

        if count <= reader.correct_rows() {
            continue;
        }

        let header = tally.first_seen.get(&fields).copied().unwrap_or(0);

        if best.map_or(true, |(f, c, _, _)| (fields, count) > (f, c)) {
            best = Some((fields, count, delimiter, header));
        }
    }

    Ok(best.map(|(_, _, delimiter, header)| (delimiter, header as usize)))
}
