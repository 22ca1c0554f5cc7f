use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A company row from the relational store. Owned by the relational store;
/// the sync pipeline only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Company {
    /// Primary key
    pub id: u64,

    /// Company name
    pub name: String,

    /// Industry label
    pub industry: Option<String>,

    /// Headquarters location
    pub location: Option<String>,

    /// Lower bound of the employee-size band
    pub min_employee_size: Option<u64>,

    /// Upper bound of the employee-size band
    pub max_employee_size: Option<u64>,

    /// Last modification timestamp, monotonically increasing per row
    pub updated_at: DateTime<Utc>,
}

impl Company {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            industry: None,
            location: None,
            min_employee_size: None,
            max_employee_size: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_employee_band(mut self, min: u64, max: u64) -> Self {
        self.min_employee_size = Some(min);
        self.max_employee_size = Some(max);
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }
}
