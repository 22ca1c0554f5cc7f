//! Typed filter specification and query compilation

use serde::{Deserialize, Serialize};
use std::ops::Bound;
use tantivy::query::{AllQuery, BooleanQuery, FuzzyTermQuery, Occur, Query, RangeQuery};
use tantivy::schema::Schema;
use tantivy::Term;

/// Client-supplied filter criteria. Every field is optional; an absent or
/// empty field means "no constraint". An entirely empty specification
/// compiles to match-everything, never to match-nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSpec {
    /// Company name values (any may match, fuzzily)
    pub company: Vec<String>,

    /// Location values, matched against prospect or company location
    pub location: Vec<String>,

    /// Job title values
    pub job_title: Vec<String>,

    /// Industry values
    pub industry: Vec<String>,

    /// Employee-size floors; a document matches when its
    /// `min_employee_size >= v` for at least one v
    pub min_employee_size: Vec<u64>,

    /// Employee-size ceilings; a document matches when its
    /// `max_employee_size <= v` for at least one v
    pub max_employee_size: Vec<u64>,
}

impl FilterSpec {
    pub fn is_empty(&self) -> bool {
        self.company.is_empty()
            && self.location.is_empty()
            && self.job_title.is_empty()
            && self.industry.is_empty()
            && self.min_employee_size.is_empty()
            && self.max_employee_size.is_empty()
    }

    /// Canonical serialization: fields in sorted name order, each value
    /// list sorted and deduplicated, so set-equal specifications always
    /// produce the same string regardless of construction order.
    pub fn canonical_string(&self) -> String {
        fn text_values(values: &[String]) -> Vec<String> {
            let mut sorted: Vec<String> = values.iter().map(|v| v.trim().to_lowercase()).collect();
            sorted.sort();
            sorted.dedup();
            sorted
        }

        fn numeric_values(values: &[u64]) -> Vec<String> {
            let mut sorted: Vec<u64> = values.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            sorted.iter().map(|v| v.to_string()).collect()
        }

        // Field names in lexicographic order
        let fields: [(&str, Vec<String>); 6] = [
            ("company", text_values(&self.company)),
            ("industry", text_values(&self.industry)),
            ("jobTitle", text_values(&self.job_title)),
            ("location", text_values(&self.location)),
            ("maxEmployeeSize", numeric_values(&self.max_employee_size)),
            ("minEmployeeSize", numeric_values(&self.min_employee_size)),
        ];

        let mut parts = Vec::new();
        for (name, values) in fields {
            if !values.is_empty() {
                parts.push(format!("{}={}", name, values.join(",")));
            }
        }
        parts.join("&")
    }
}

/// Pagination for a search request: offset-based for the bulk listing path,
/// cursor-based (search-after on the last returned prospect id) for the
/// streaming path. A request carries exactly one of the two shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PageRequest {
    Numbered { size: usize, number: usize },
    Cursor { size: usize, cursor: u64 },
}

impl PageRequest {
    pub fn size(&self) -> usize {
        match self {
            PageRequest::Numbered { size, .. } => *size,
            PageRequest::Cursor { size, .. } => *size,
        }
    }

    /// Fragment appended to the canonical filter string for cache keying
    pub fn canonical_fragment(&self) -> String {
        match self {
            PageRequest::Numbered { size, number } => format!("page={};size={}", number, size),
            PageRequest::Cursor { size, cursor } => format!("cursor={};size={}", cursor, size),
        }
    }
}

/// Compiles a [`FilterSpec`] into a Tantivy query. Per-field predicates are
/// AND-combined; values within a field are OR-combined; text values match
/// fuzzily per token; employee-size values compile to inclusive ranges.
pub struct QueryBuilder {
    schema: Schema,
}

impl QueryBuilder {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    /// Edit distance scaled to token length, mirroring common
    /// fuzziness-AUTO behavior: short tokens match exactly, medium tokens
    /// tolerate one edit, long tokens two.
    fn fuzzy_distance(token: &str) -> u8 {
        match token.chars().count() {
            0..=2 => 0,
            3..=5 => 1,
            _ => 2,
        }
    }

    /// One fuzzy clause per whitespace token, all of which must match
    fn fuzzy_value_query(
        &self,
        fields: &[&str],
        value: &str,
    ) -> Option<Box<dyn Query>> {
        let tokens: Vec<String> = value
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return None;
        }

        // A value matches a target field when every token matches it;
        // with several target fields (location) any field may satisfy it.
        let mut field_clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for field_name in fields {
            let Ok(field) = self.schema.get_field(field_name) else {
                continue;
            };

            let mut token_clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
            for token in &tokens {
                let term = Term::from_field_text(field, token);
                let fuzzy = FuzzyTermQuery::new(term, Self::fuzzy_distance(token), true);
                token_clauses.push((Occur::Must, Box::new(fuzzy)));
            }

            field_clauses.push((Occur::Should, Box::new(BooleanQuery::new(token_clauses))));
        }

        if field_clauses.is_empty() {
            None
        } else {
            Some(Box::new(BooleanQuery::new(field_clauses)))
        }
    }

    /// OR across per-value queries for one filter field
    fn text_field_query(
        &self,
        fields: &[&str],
        values: &[String],
    ) -> Option<Box<dyn Query>> {
        let value_queries: Vec<(Occur, Box<dyn Query>)> = values
            .iter()
            .filter_map(|value| self.fuzzy_value_query(fields, value))
            .map(|q| (Occur::Should, q))
            .collect();

        if value_queries.is_empty() {
            None
        } else {
            Some(Box::new(BooleanQuery::new(value_queries)))
        }
    }

    /// OR of inclusive ranges on a u64 field
    fn range_field_query(
        &self,
        field_name: &str,
        values: &[u64],
        lower_bounded: bool,
    ) -> Option<Box<dyn Query>> {
        if values.is_empty() {
            return None;
        }
        let _field = self.schema.get_field(field_name).ok()?;

        let range_queries: Vec<(Occur, Box<dyn Query>)> = values
            .iter()
            .map(|&v| {
                let (lower, upper) = if lower_bounded {
                    (Bound::Included(v), Bound::Unbounded)
                } else {
                    (Bound::Unbounded, Bound::Included(v))
                };
                let range = RangeQuery::new_u64_bounds(field_name.to_string(), lower, upper);
                (Occur::Should, Box::new(range) as Box<dyn Query>)
            })
            .collect();

        Some(Box::new(BooleanQuery::new(range_queries)))
    }

    /// Build a Tantivy query from a FilterSpec
    pub fn compile(&self, spec: &FilterSpec) -> Box<dyn Query> {
        let mut subqueries: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        if let Some(q) = self.text_field_query(&["company_name"], &spec.company) {
            subqueries.push((Occur::Must, q));
        }
        if let Some(q) =
            self.text_field_query(&["prospect_location", "company_location"], &spec.location)
        {
            subqueries.push((Occur::Must, q));
        }
        if let Some(q) = self.text_field_query(&["job_title"], &spec.job_title) {
            subqueries.push((Occur::Must, q));
        }
        if let Some(q) = self.text_field_query(&["industry"], &spec.industry) {
            subqueries.push((Occur::Must, q));
        }
        if let Some(q) =
            self.range_field_query("min_employee_size", &spec.min_employee_size, true)
        {
            subqueries.push((Occur::Must, q));
        }
        if let Some(q) =
            self.range_field_query("max_employee_size", &spec.max_employee_size, false)
        {
            subqueries.push((Occur::Must, q));
        }

        if subqueries.is_empty() {
            // No constraints - match the entire corpus
            Box::new(AllQuery)
        } else {
            Box::new(BooleanQuery::new(subqueries))
        }
    }

    /// Compile with a search-after predicate: only documents with
    /// `prospect_id > cursor`
    pub fn compile_after(&self, spec: &FilterSpec, cursor: u64) -> Box<dyn Query> {
        let base = self.compile(spec);
        let Ok(_field) = self.schema.get_field("prospect_id") else {
            return base;
        };
        let after = RangeQuery::new_u64_bounds(
            "prospect_id".to_string(),
            Bound::Excluded(cursor),
            Bound::Unbounded,
        );

        Box::new(BooleanQuery::new(vec![
            (Occur::Must, base),
            (Occur::Must, Box::new(after) as Box<dyn Query>),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::document::build_prospect_schema;

    #[test]
    fn test_canonical_string_is_order_independent() {
        let a = FilterSpec {
            company: vec!["Globex".to_string(), "Acme".to_string()],
            industry: vec!["Tech".to_string()],
            ..Default::default()
        };
        let b = FilterSpec {
            industry: vec!["tech".to_string()],
            company: vec!["acme".to_string(), "globex".to_string()],
            ..Default::default()
        };

        assert_eq!(a.canonical_string(), b.canonical_string());
        assert_eq!(a.canonical_string(), "company=acme,globex&industry=tech");
    }

    #[test]
    fn test_canonical_string_dedupes_values() {
        let spec = FilterSpec {
            min_employee_size: vec![50, 10, 50],
            ..Default::default()
        };
        assert_eq!(spec.canonical_string(), "minEmployeeSize=10,50");
    }

    #[test]
    fn test_empty_spec_compiles_to_match_all() {
        let builder = QueryBuilder::new(build_prospect_schema());
        let spec = FilterSpec::default();
        assert!(spec.is_empty());

        // AllQuery has no boolean structure; a filtered spec compiles to a
        // boolean query instead.
        let all = builder.compile(&spec);
        assert!(format!("{:?}", all).contains("AllQuery"));

        let filtered = builder.compile(&FilterSpec {
            company: vec!["acme".to_string()],
            ..Default::default()
        });
        assert!(format!("{:?}", filtered).contains("BooleanQuery"));
    }

    #[test]
    fn test_fuzzy_distance_scales_with_length() {
        assert_eq!(QueryBuilder::fuzzy_distance("ab"), 0);
        assert_eq!(QueryBuilder::fuzzy_distance("tech"), 1);
        assert_eq!(QueryBuilder::fuzzy_distance("technology"), 2);
    }

    #[test]
    fn test_page_request_shapes() {
        let numbered: PageRequest =
            serde_json::from_str(r#"{"size": 10, "number": 2}"#).unwrap();
        assert_eq!(numbered, PageRequest::Numbered { size: 10, number: 2 });

        let cursor: PageRequest = serde_json::from_str(r#"{"size": 10, "cursor": 42}"#).unwrap();
        assert_eq!(cursor, PageRequest::Cursor { size: 10, cursor: 42 });

        assert_ne!(numbered.canonical_fragment(), cursor.canonical_fragment());
    }
}
