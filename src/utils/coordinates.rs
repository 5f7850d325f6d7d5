use crate::error::{PipelineError, Result};

/// Convert DMS (Degrees:Minutes:Seconds) format to decimal degrees
///
/// # Examples
/// ```
/// use hydromet_pipeline::utils::dms_to_decimal;
///
/// let decimal = dms_to_decimal("4:36:00").unwrap();
/// assert!((decimal - 4.6).abs() < 0.000001);
/// ```
pub fn dms_to_decimal(dms: &str) -> Result<f64> {
    let trimmed = dms.trim();
    let invalid = |what: &str| PipelineError::InvalidCoordinate(format!("{} in DMS value '{}'", what, dms));

    let mut parts = trimmed.split(':');
    let (Some(d), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid("Expected DD:MM:SS"));
    };

    let field = |raw: &str, name: &str| -> Result<f64> {
        raw.trim()
            .parse::<f64>()
            .map_err(|_| invalid(&format!("Invalid {} '{}'", name, raw)))
    };
    let degrees = field(d, "degrees")?;
    let minutes = field(m, "minutes")?;
    let seconds = field(s, "seconds")?;

    if !(0.0..60.0).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
        return Err(invalid("Minutes and seconds must lie in [0, 60)"));
    }

    // "-0:07:39" is negative even though its degrees parse as zero.
    let sign = if trimmed.starts_with('-') { -1.0 } else { 1.0 };
    Ok(sign * (degrees.abs() + minutes / 60.0 + seconds / 3600.0))
}

/// Parse coordinate that might be in DMS or decimal format.
/// A comma is accepted as decimal separator ("4,6011").
pub fn parse_coordinate(coord_str: &str) -> Result<f64> {
    let trimmed = coord_str.trim();

    if trimmed.contains(':') {
        return dms_to_decimal(trimmed);
    }

    let normalized = trimmed.replace(',', ".");
    normalized
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            PipelineError::InvalidCoordinate(format!("Invalid coordinate value: '{}'", coord_str))
        })
}

/// Validate WGS84 coordinate bounds
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(PipelineError::InvalidCoordinate(format!(
            "Latitude {} is outside valid range [-90, 90]",
            latitude
        )));
    }

    if !(-180.0..=180.0).contains(&longitude) {
        return Err(PipelineError::InvalidCoordinate(format!(
            "Longitude {} is outside valid range [-180, 180]",
            longitude
        )));
    }

    Ok(())
}

/// Parse an optional latitude/longitude pair; `None` when either side is
/// absent, unparseable or out of bounds.
pub fn parse_location(latitude: Option<&str>, longitude: Option<&str>) -> Option<(f64, f64)> {
    let lat = parse_coordinate(latitude?).ok()?;
    let lon = parse_coordinate(longitude?).ok()?;
    validate_coordinates(lat, lon).ok()?;
    Some((lat, lon))
}

/// Calculate the distance between two points using the Haversine formula
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}
