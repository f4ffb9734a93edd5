use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use crate::debug;
use crate::dtype::{parse_value, DataType, Value};
use crate::error::{Error, Result};

/// Ordered column names plus a name → position mapping.
///
/// Built once per reader (at header commit, or from explicit configuration)
/// and shared by every [`Row`] that reader emits, so rows stay indexable by
/// name after the reader is gone.
#[derive(Debug, Default)]
pub struct ColNames {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColNames {
    pub(crate) fn new(names: Vec<String>) -> Self {
        let mut positions = HashMap::with_capacity(names.len());

        // Duplicate names: the later occurrence shadows the earlier one in
        // the mapping, but every name keeps its slot in order.
        for (i, name) in names.iter().enumerate() {
            positions.insert(name.clone(), i);
        }

        Self { names, positions }
    }

    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[inline]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

/// One parsed CSV record.
///
/// Internally a row is a single buffer holding the concatenated, unescaped
/// field bytes, plus the end offset of every field within that buffer.
/// Quotes have already been stripped and doubled quotes collapsed by the
/// parser, so slicing a field never allocates.
pub struct Row {
    buf: Vec<u8>,
    splits: Vec<usize>,
    names: Arc<ColNames>,
}

impl Row {
    #[inline]
    pub(crate) fn new(buf: Vec<u8>, splits: Vec<usize>, names: Arc<ColNames>) -> Self {
        Self { buf, splits, names }
    }

    /// Number of fields of the record.
    #[inline]
    pub fn len(&self) -> usize {
        self.splits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    /// The column names shared by every row of the originating reader.
    #[inline]
    pub fn col_names(&self) -> &ColNames {
        &self.names
    }

    #[inline]
    fn bounds(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.splits.len() {
            return None;
        }

        let start = if index == 0 { 0 } else { self.splits[index - 1] };

        Some((start, self.splits[index]))
    }

    /// Returns the raw bytes of the nth field, if it is not out-of-bounds.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.bounds(index).map(|(start, end)| &self.buf[start..end])
    }

    /// Returns a typed view over the nth field.
    #[inline]
    pub fn field(&self, index: usize) -> Option<Field<'_>> {
        self.get(index).map(|bytes| Field { bytes, index })
    }

    /// Returns a typed view over the field under the given column name.
    pub fn field_by_name(&self, name: &str) -> Result<Field<'_>> {
        let index = self
            .names
            .index_of(name)
            .ok_or_else(|| Error::unknown_column(name))?;

        // A row always spans the full column set (or the subset thereof),
        // but a stale name map should surface as a lookup error rather
        // than a panic.
        self.field(index).ok_or_else(|| Error::unknown_column(name))
    }

    /// Returns an iterator over the record's fields.
    #[inline]
    pub fn iter(&self) -> RowIter<'_> {
        RowIter {
            row: self,
            current_forward: 0,
            current_backward: self.len(),
        }
    }

    /// Materialize the record into owned strings (lossy on invalid UTF-8).
    /// Meant for interop boundaries, not for hot paths.
    pub fn to_vec(&self) -> Vec<String> {
        self.iter()
            .map(|cell| String::from_utf8_lossy(cell).into_owned())
            .collect()
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl Index<usize> for Row {
    type Output = [u8];

    #[inline]
    fn index(&self, index: usize) -> &[u8] {
        match self.get(index) {
            Some(cell) => cell,
            None => panic!("field index {} out of bounds", index),
        }
    }
}

impl Index<&str> for Row {
    type Output = [u8];

    #[inline]
    fn index(&self, name: &str) -> &[u8] {
        match self.names.index_of(name).and_then(|i| self.get(i)) {
            Some(cell) => cell,
            None => panic!("no column named {:?}", name),
        }
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Row(")?;
        f.debug_list()
            .entries(self.iter().map(debug::Bytes))
            .finish()?;
        write!(f, ")")?;
        Ok(())
    }
}

pub struct RowIter<'a> {
    row: &'a Row,
    current_forward: usize,
    current_backward: usize,
}

impl ExactSizeIterator for RowIter<'_> {}

impl<'a> Iterator for RowIter<'a> {
    type Item = &'a [u8];

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.current_forward == self.current_backward {
            None
        } else {
            let cell = self.row.get(self.current_forward);

            self.current_forward += 1;

            cell
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let size = self.current_backward - self.current_forward;

        (size, Some(size))
    }
}

impl DoubleEndedIterator for RowIter<'_> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.current_forward == self.current_backward {
            None
        } else {
            self.current_backward -= 1;

            self.row.get(self.current_backward)
        }
    }
}

impl<'r> IntoIterator for &'r Row {
    type IntoIter = RowIter<'r>;
    type Item = &'r [u8];

    #[inline]
    fn into_iter(self) -> RowIter<'r> {
        self.iter()
    }
}

/// A transient view over one field of a [`Row`].
///
/// Holds the field's bytes and column index; classification happens on
/// demand and never allocates.
#[derive(Clone, Copy)]
pub struct Field<'r> {
    bytes: &'r [u8],
    index: usize,
}

impl<'r> Field<'r> {
    #[inline]
    pub fn as_bytes(&self) -> &'r [u8] {
        self.bytes
    }

    /// Position of this field within its row.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The classified kind of this field's content.
    #[inline]
    pub fn dtype(&self) -> DataType {
        self.value().dtype()
    }

    /// The classified kind together with the parsed magnitude.
    #[inline]
    pub fn value(&self) -> Value {
        parse_value(self.bytes)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.dtype() == DataType::Null
    }

    #[inline]
    pub fn is_text(&self) -> bool {
        self.dtype() == DataType::Text
    }

    #[inline]
    pub fn is_num(&self) -> bool {
        self.dtype() >= DataType::Integer
    }

    #[inline]
    pub fn is_int(&self) -> bool {
        self.dtype() == DataType::Integer
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        self.dtype() == DataType::Float
    }

    /// The field's text, borrowed when it is valid UTF-8.
    #[inline]
    pub fn get_str(&self) -> Cow<'r, str> {
        String::from_utf8_lossy(self.bytes)
    }

    /// The field as a wide float. Succeeds on integers and floats.
    pub fn get_f64(&self) -> Result<f64> {
        match self.value() {
            Value::Integer(v) => Ok(v as f64),
            Value::Float(v) => Ok(v),
            Value::Null => Err(Error::null_value()),
            Value::Text => Err(Error::type_mismatch(DataType::Float, DataType::Text)),
        }
    }

    /// The field as a wide signed integer. A float (including an integer
    /// wider than `i64`) fails with an overflow rather than truncating.
    pub fn get_i64(&self) -> Result<i64> {
        match self.value() {
            Value::Integer(v) => Ok(v),
            Value::Float(_) => Err(Error::overflow()),
            Value::Null => Err(Error::null_value()),
            Value::Text => Err(Error::type_mismatch(DataType::Integer, DataType::Text)),
        }
    }

    /// The field as a narrow signed integer.
    pub fn get_i32(&self) -> Result<i32> {
        let wide = self.get_i64()?;

        i32::try_from(wide).map_err(|_| Error::overflow())
    }
}

impl PartialEq<&str> for Field<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.bytes == other.as_bytes()
    }
}

impl fmt::Debug for Field<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Field({:?})", debug::Bytes(self.bytes))
    }
}
