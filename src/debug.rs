use std::fmt;

use bstr::BStr;

// Adapter so rows and fields print their bytes as readable text.
pub(crate) struct Bytes<'a>(pub(crate) &'a [u8]);

impl fmt::Debug for Bytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", BStr::new(self.0))
    }
}
