pub mod cleaner;
pub mod consolidator;
pub mod outliers;
pub mod parallel_processor;
pub mod spatial_attributor;

pub use cleaner::{clean, coerce_value, Cleaner, VariableRule, VariableRules};
pub use consolidator::{ConsolidationStats, Consolidator};
pub use outliers::{iqr_flags, quantile, zscore_flags, IqrBounds};
pub use parallel_processor::ShardedExecutor;
pub use spatial_attributor::{
    attribute, nearest_station, stations_within, RegionIndex, SpatialAttributor,
};
