pub mod reader;
pub mod record;
pub mod writer;

pub use reader::RecordReader;
pub use record::*;
pub use writer::{GenerationHeader, RecordWriter};
