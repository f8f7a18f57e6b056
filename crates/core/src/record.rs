//! Vehicle observations delivered by the record source.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, RecordRejection};

/// Globally unique, immutable identifier of a vehicle record.
///
/// Opaque to this crate; the only rule is that it is not blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Aid(String);

impl Aid {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("aid cannot be blank"));
        }
        if trimmed.len() == value.len() {
            Ok(Self(value))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for Aid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Aid {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Aid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One vehicle observation, as received on the wire.
///
/// Every field is optional at the boundary: a record without an `aid` is
/// rejected by [`VehicleRecord::validate`], while missing categorical fields
/// simply do not contribute to their mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRecord {
    #[serde(default)]
    pub aid: Option<String>,
    #[serde(default, rename = "type")]
    pub vehicle_type: Option<String>,
    #[serde(default)]
    pub model_year: Option<i32>,
    #[serde(default)]
    pub speed_class: Option<String>,
    #[serde(default, alias = "hp")]
    pub horsepower: Option<f64>,
}

impl VehicleRecord {
    pub fn new(aid: impl Into<String>) -> Self {
        Self {
            aid: Some(aid.into()),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, vehicle_type: impl Into<String>) -> Self {
        self.vehicle_type = Some(vehicle_type.into());
        self
    }

    pub fn with_model_year(mut self, year: i32) -> Self {
        self.model_year = Some(year);
        self
    }

    pub fn with_speed_class(mut self, speed_class: impl Into<String>) -> Self {
        self.speed_class = Some(speed_class.into());
        self
    }

    pub fn with_horsepower(mut self, hp: f64) -> Self {
        self.horsepower = Some(hp);
        self
    }

    /// Check the mandatory fields and return the record identifier.
    pub fn validate(&self) -> Result<Aid, RecordRejection> {
        let aid = self
            .aid
            .as_deref()
            .and_then(|a| Aid::new(a).ok())
            .ok_or(RecordRejection::MissingAid)?;

        if let Some(hp) = self.horsepower {
            if !hp.is_finite() || hp < 0.0 {
                return Err(RecordRejection::InvalidHorsepower(hp));
            }
        }

        Ok(aid)
    }

    pub(crate) fn type_key(&self) -> Option<&str> {
        non_blank(self.vehicle_type.as_deref())
    }

    pub(crate) fn speed_class_key(&self) -> Option<&str> {
        non_blank(self.speed_class.as_deref())
    }

    pub(crate) fn decade_key(&self) -> Option<String> {
        self.model_year.map(decade_label)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Decade label of a model year: `floor(year / 10) * 10`.
///
/// Computed in `i64` so the full `i32` range maps without overflow.
pub fn decade_label(model_year: i32) -> String {
    (i64::from(model_year).div_euclid(10) * 10).to_string()
}
