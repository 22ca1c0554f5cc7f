//! Search document structure and schema

use crate::models::{Company, Prospect};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tantivy::schema::*;
use tantivy::TantivyDocument;

/// Trait for documents that can be indexed and searched
pub trait SearchDocument {
    /// Convert to Tantivy document
    fn to_tantivy_doc(&self, schema: &Schema) -> TantivyDocument;

    /// Get document ID
    fn document_id(&self) -> u64;
}

/// The denormalized document indexed for search: one row per prospect,
/// joined with its company.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProspectDocument {
    /// Prospect primary key; the stable document identifier
    pub prospect_id: u64,

    /// Company primary key
    pub company_id: u64,

    /// Prospect display name
    pub full_name: String,

    /// Job title
    pub job_title: Option<String>,

    /// Prospect-level location
    pub prospect_location: Option<String>,

    /// Company name
    pub company_name: String,

    /// Industry label
    pub industry: Option<String>,

    /// Company-level location
    pub company_location: Option<String>,

    /// Lower bound of the employee-size band
    pub min_employee_size: Option<u64>,

    /// Upper bound of the employee-size band
    pub max_employee_size: Option<u64>,

    /// max(company.updated_at, prospect.updated_at); drives
    /// last-writer-wins in the index writer
    pub last_updated: DateTime<Utc>,
}

impl ProspectDocument {
    /// Map a joined prospect/company pair into the index shape. Pure and
    /// total: every valid row pair produces a document, and the same pair
    /// always produces the same document.
    pub fn from_join(prospect: &Prospect, company: &Company) -> Self {
        Self {
            prospect_id: prospect.id,
            company_id: company.id,
            full_name: prospect.full_name(),
            job_title: prospect.job_title.clone(),
            prospect_location: prospect.location.clone(),
            company_name: company.name.clone(),
            industry: company.industry.clone(),
            company_location: company.location.clone(),
            min_employee_size: company.min_employee_size,
            max_employee_size: company.max_employee_size,
            last_updated: prospect.updated_at.max(company.updated_at),
        }
    }

    /// `last_updated` at the microsecond precision stored in the index
    pub fn last_updated_micros(&self) -> i64 {
        self.last_updated.timestamp_micros()
    }
}

impl SearchDocument for ProspectDocument {
    fn to_tantivy_doc(&self, schema: &Schema) -> TantivyDocument {
        let mut doc = TantivyDocument::new();

        if let Ok(field) = schema.get_field("prospect_id") {
            doc.add_u64(field, self.prospect_id);
        }

        if let Ok(field) = schema.get_field("company_id") {
            doc.add_u64(field, self.company_id);
        }

        if let Ok(field) = schema.get_field("full_name") {
            doc.add_text(field, &self.full_name);
        }

        if let Some(ref job_title) = self.job_title {
            if let Ok(field) = schema.get_field("job_title") {
                doc.add_text(field, job_title);
            }
        }

        if let Some(ref location) = self.prospect_location {
            if let Ok(field) = schema.get_field("prospect_location") {
                doc.add_text(field, location);
            }
        }

        if let Ok(field) = schema.get_field("company_name") {
            doc.add_text(field, &self.company_name);
        }

        if let Some(ref industry) = self.industry {
            if let Ok(field) = schema.get_field("industry") {
                doc.add_text(field, industry);
            }
        }

        if let Some(ref location) = self.company_location {
            if let Ok(field) = schema.get_field("company_location") {
                doc.add_text(field, location);
            }
        }

        if let Some(min) = self.min_employee_size {
            if let Ok(field) = schema.get_field("min_employee_size") {
                doc.add_u64(field, min);
            }
        }

        if let Some(max) = self.max_employee_size {
            if let Ok(field) = schema.get_field("max_employee_size") {
                doc.add_u64(field, max);
            }
        }

        if let Ok(field) = schema.get_field("last_updated") {
            doc.add_date(
                field,
                tantivy::DateTime::from_timestamp_micros(self.last_updated.timestamp_micros()),
            );
        }

        doc
    }

    fn document_id(&self) -> u64 {
        self.prospect_id
    }
}

/// Build the search schema for prospect documents
pub fn build_prospect_schema() -> Schema {
    let mut schema_builder = Schema::builder();

    // Stable document identifier - fast field, drives sort order and deletes
    schema_builder.add_u64_field("prospect_id", INDEXED | STORED | FAST);

    // Company key - indexed so a company delete can find its documents
    schema_builder.add_u64_field("company_id", INDEXED | STORED);

    // Text fields - full-text indexed, stored for hit reconstruction
    schema_builder.add_text_field("full_name", TEXT | STORED);
    schema_builder.add_text_field("job_title", TEXT | STORED);
    schema_builder.add_text_field("prospect_location", TEXT | STORED);
    schema_builder.add_text_field("company_name", TEXT | STORED);
    schema_builder.add_text_field("industry", TEXT | STORED);
    schema_builder.add_text_field("company_location", TEXT | STORED);

    // Employee-size band - range-filterable
    schema_builder.add_u64_field("min_employee_size", INDEXED | STORED | FAST);
    schema_builder.add_u64_field("max_employee_size", INDEXED | STORED | FAST);

    // Denormalization watermark
    schema_builder.add_date_field("last_updated", INDEXED | STORED | FAST);

    schema_builder.build()
}
