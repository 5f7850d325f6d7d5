pub mod dataset_overview;
pub mod trend_analyzer;

pub use dataset_overview::{DatasetOverview, DataQuality, GeographicBounds, VariableExtremes};
pub use trend_analyzer::{aggregate, neumaier_sum, summarize, SummaryOptions};
pub use trend_tests::{
    linear_regression, mann_kendall, seasonal_profiles, trend_tests, LinearFit, MannKendall,
    SeasonalProfile, TrendDirection, TrendTest,
};
