/// Remote source defaults (IDEAM hydrometeorological observations on datos.gov.co)
pub const DEFAULT_SOURCE_HOST: &str = "https://www.datos.gov.co";
pub const DEFAULT_DATASET_ID: &str = "sbwg-7ju4";
pub const DEFAULT_DEPARTMENT: &str = "CUNDINAMARCA";
pub const DEFAULT_SOURCE_UTC_OFFSET_HOURS: i32 = -5;

/// Source column names
pub const COL_STATION_CODE: &str = "codigoestacion";
pub const COL_STATION_NAME: &str = "nombreestacion";
pub const COL_TIMESTAMP: &str = "fechaobservacion";
pub const COL_VALUE: &str = "valorobservado";
pub const COL_SENSOR: &str = "descripcionsensor";
pub const COL_UNIT: &str = "unidadmedida";
pub const COL_DEPARTMENT: &str = "departamento";
pub const COL_MUNICIPALITY: &str = "municipio";
pub const COL_LATITUDE: &str = "latitud";
pub const COL_LONGITUDE: &str = "longitud";

/// Columns every source page and stored raw file must carry
pub const REQUIRED_SOURCE_COLUMNS: [&str; 4] = [COL_STATION_CODE, COL_TIMESTAMP, COL_SENSOR, COL_VALUE];

/// Stored raw file column names
pub const RAW_COLUMNS: [&str; 12] = [
    "station_id",
    "timestamp",
    "variable",
    "value",
    "unit",
    "batch_id",
    "extracted_at",
    "station_name",
    "department",
    "municipality",
    "latitude",
    "longitude",
];
pub const REQUIRED_RAW_COLUMNS: [&str; 4] = ["station_id", "timestamp", "variable", "value"];

/// Region label for observations outside every polygon
pub const UNKNOWN_REGION: &str = "unknown";

/// Fetch defaults
pub const DEFAULT_PAGE_SIZE: usize = 50_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// Cleaning defaults
pub const DEFAULT_IQR_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_MIN_GROUP_SIZE: usize = 4;
pub const ZSCORE_THRESHOLD: f64 = 3.0;

/// Plausible ranges for Cundinamarca
pub const AIR_TEMPERATURE_RANGE: (f64, f64) = (-10.0, 45.0);
pub const PRECIPITATION_RANGE: (f64, f64) = (0.0, 1000.0);
pub const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);
pub const PRESSURE_RANGE: (f64, f64) = (800.0, 1100.0);

/// Trend tests
pub const MIN_TREND_BUCKETS: usize = 3;
pub const MANN_KENDALL_Z_CRITICAL: f64 = 1.96;

/// Directories
pub const DEFAULT_RAW_DATA_DIR: &str = "data/raw";
pub const DEFAULT_PROCESSED_DATA_DIR: &str = "data/processed";

/// Processing defaults
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10000;

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
