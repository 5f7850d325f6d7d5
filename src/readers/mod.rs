pub mod fetcher;
pub mod memory_source;
pub mod raw_file_reader;
pub mod region_reader;
pub mod socrata_client;

pub use fetcher::{
    collect_batches, drain_batches, stations_from_batches, DrainedBatches, FetchCheckpoint, Fetcher,
    FetcherConfig, RowMapper,
};
pub use memory_source::MemorySource;
pub use raw_file_reader::RawFileReader;
pub use region_reader::RegionReader;
pub use socrata_client::{Page, PageSource, SocrataClient, SourceRow};
