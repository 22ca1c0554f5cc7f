use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A prospect row from the relational store, referencing its company by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prospect {
    /// Primary key
    pub id: u64,

    /// Foreign key to the company row
    pub company_id: u64,

    /// Given name
    pub first_name: String,

    /// Family name
    pub last_name: String,

    /// Job title
    pub job_title: Option<String>,

    /// Location, when it differs from the company's
    pub location: Option<String>,

    /// Contact email
    pub email: Option<String>,

    /// Last modification timestamp, monotonically increasing per row
    pub updated_at: DateTime<Utc>,
}

impl Prospect {
    pub fn new(
        id: u64,
        company_id: u64,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            company_id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            job_title: None,
            location: None,
            email: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_job_title(mut self, job_title: impl Into<String>) -> Self {
        self.job_title = Some(job_title.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Display name as indexed
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
