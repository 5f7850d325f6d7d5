pub mod parquet_writer;
pub mod raw_writer;

pub use parquet_writer::{ParquetFileInfo, ParquetWriter};
pub use raw_writer::RawBatchWriter;
