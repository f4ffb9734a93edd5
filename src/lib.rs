mod core;
mod debug;
mod dtype;
mod error;
mod guess;
mod pipeline;
mod reader;
mod records;

pub use dtype::{classify, parse_value, DataType, Value};
pub use error::{Error, ErrorKind, Result};
pub use guess::guess_format;
pub use reader::{get_file_info, parse, FileInfo, Format, IntoRows, Reader, Rows};
pub use records::{ColNames, Field, Row, RowIter};
