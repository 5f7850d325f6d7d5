use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Station {
    #[validate(length(min = 1))]
    pub id: String,

    pub name: String,

    pub department: Option<String>,

    pub municipality: Option<String>,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,

    pub elevation: Option<f64>,

    /// Administrative region resolved by spatial attribution.
    pub region: Option<String>,

    /// Extraction time of the batch this metadata came from.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Station {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            department: None,
            municipality: None,
            latitude: None,
            longitude: None,
            elevation: None,
            region: None,
            updated_at: None,
        }
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn with_municipality(mut self, municipality: impl Into<String>) -> Self {
        self.municipality = Some(municipality.into());
        self
    }

    /// Valid (latitude, longitude) pair, or `None` when the station is unlocated.
    pub fn location(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon))
                if lat.is_finite()
                    && lon.is_finite()
                    && (-90.0..=90.0).contains(&lat)
                    && (-180.0..=180.0).contains(&lon) =>
            {
                Some((lat, lon))
            }
            _ => None,
        }
    }

    pub fn is_located(&self) -> bool {
        self.location().is_some()
    }

    pub fn is_in_department(&self, department: &str) -> bool {
        self.department
            .as_deref()
            .is_some_and(|d| d.trim().eq_ignore_ascii_case(department.trim()))
    }
}
