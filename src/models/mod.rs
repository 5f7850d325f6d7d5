pub mod batch;
pub mod observation;
pub mod region;
pub mod report;
pub mod station;
pub mod trend;

pub use batch::{Batch, BatchMetadata, Dataset, FieldKind, SourceQuery};
pub use observation::{MergeKey, Observation, QualityFlags, Variable};
pub use region::{
    AttributedDataset, AttributedObservation, AttributionReport, GapReason, RegionName,
    RegionPolygon, SpatialAttributionGap,
};
pub use report::{CleaningReport, ValidationWarning, WarningKind};
pub use station::Station;
pub use trend::{AggregateStats, Granularity, TimeBucket, TrendKey, TrendRow, TrendSummary};
