use std::{error, fmt, io, result};

use crate::dtype::DataType;

#[derive(Debug)]
pub enum ErrorKind {
    /// The input could not be opened or read.
    Io(io::Error),
    /// Strict mode only: a record whose field count does not match the
    /// column names.
    MalformedRow {
        row: u64,
        expected: usize,
        got: usize,
    },
    /// A typed retrieval incompatible with the field's classified kind.
    TypeMismatch {
        requested: DataType,
        found: DataType,
    },
    /// A numeric retrieval that cannot fit the requested width.
    Overflow,
    /// A lookup by a name absent from the column names.
    UnknownColumn(String),
    /// A numeric retrieval on an empty field.
    NullValue,
}

#[derive(Debug)]
pub struct Error(ErrorKind);

impl Error {
    pub(crate) fn malformed_row(row: u64, expected: usize, got: usize) -> Self {
        Self(ErrorKind::MalformedRow { row, expected, got })
    }

    pub(crate) fn type_mismatch(requested: DataType, found: DataType) -> Self {
        Self(ErrorKind::TypeMismatch { requested, found })
    }

    pub(crate) fn overflow() -> Self {
        Self(ErrorKind::Overflow)
    }

    pub(crate) fn unknown_column(name: &str) -> Self {
        Self(ErrorKind::UnknownColumn(name.to_string()))
    }

    pub(crate) fn null_value() -> Self {
        Self(ErrorKind::NullValue)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self(ErrorKind::Io(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        Self::new(io::ErrorKind::Other, err)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.0 {
            ErrorKind::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.0 {
            ErrorKind::Io(err) => err.fmt(f),
            ErrorKind::MalformedRow { row, expected, got } => write!(
                f,
                "CSV error: row {} has {} fields, but {} columns were expected",
                row, got, expected
            ),
            ErrorKind::TypeMismatch { requested, found } => {
                write!(f, "attempted to read a {:?} field as {:?}", found, requested)
            }
            ErrorKind::Overflow => write!(f, "numeric value does not fit the requested width"),
            ErrorKind::UnknownColumn(name) => write!(f, "no column named {:?}", name),
            ErrorKind::NullValue => write!(f, "numeric read of an empty field"),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
