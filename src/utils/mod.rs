pub mod backoff;
pub mod constants;
pub mod coordinates;
pub mod filename;
pub mod logging;
pub mod progress;
pub mod time;

pub use backoff::{BackoffPolicy, RetryFailure, Retryable};
pub use constants::*;
pub use coordinates::{dms_to_decimal, haversine_distance, parse_coordinate, parse_location};
pub use filename::{
    next_free_path, processed_dataset_filename, raw_batch_filename, trend_summary_filename,
};
pub use progress::ProgressReporter;
pub use time::{offset_hours, parse_timestamp};
