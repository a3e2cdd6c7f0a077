use serde::Deserialize;

/// Shipment fields shared by every carrier request.
#[derive(Debug, Clone, Deserialize)]
pub struct Parcel {
    pub origin_country: String,
    pub destination_country: String,
    pub weight: f64,
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

impl Parcel {
    pub fn validate(&self) -> Result<(), String> {
        require_text("origin_country", &self.origin_country)?;
        require_text("destination_country", &self.destination_country)?;
        require_positive("weight", self.weight)?;
        require_positive("length", self.length)?;
        require_positive("width", self.width)?;
        require_positive("height", self.height)
    }
}

pub(crate) fn require_positive(field: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(format!("{field} must be a positive number"))
    }
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample() -> Parcel {
    Parcel {
        origin_country: "US".to_string(),
        destination_country: "IT".to_string(),
        weight: 2.5,
        length: 30.0,
        width: 20.0,
        height: 10.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_parcel() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_measurements() {
        let parcel = Parcel { weight: 0.0, ..sample() };
        assert_eq!(parcel.validate().unwrap_err(), "weight must be a positive number");

        let parcel = Parcel { height: f64::NAN, ..sample() };
        assert_eq!(parcel.validate().unwrap_err(), "height must be a positive number");
    }

    #[test]
    fn test_rejects_blank_country() {
        let parcel = Parcel {
            destination_country: "  ".to_string(),
            ..sample()
        };
        assert_eq!(
            parcel.validate().unwrap_err(),
            "destination_country must not be empty"
        );
    }
}
