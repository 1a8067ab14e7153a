//! Search query model and validation
//!
//! Validation is strict: an unknown sort mode or a page size outside
//! [1, MAX_PAGE_SIZE] is a validation error, never silently clamped.

use std::str::FromStr;

use crate::types::{CaselineError, Result};

/// Page size bounds
pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Result ordering
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortMode {
    #[default]
    Relevance,
    Recency,
    Popularity,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::Recency => "recency",
            Self::Popularity => "popularity",
        }
    }
}

impl FromStr for SortMode {
    type Err = CaselineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "relevance" => Ok(Self::Relevance),
            "recency" => Ok(Self::Recency),
            "popularity" => Ok(Self::Popularity),
            other => Err(CaselineError::Validation(format!(
                "invalid sort mode: {}",
                other
            ))),
        }
    }
}

/// Parsed and validated use-case search query
#[derive(Clone, Debug)]
pub struct SearchQuery {
    /// Free-text query (None when absent or blank)
    pub search: Option<String>,

    /// Categorical filters, AND semantics across dimensions
    pub industry: Option<String>,
    pub region: Option<String>,
    pub cost: Option<String>,
    pub tags: Vec<String>,

    pub sort: SortMode,

    /// 1-based page number
    pub page: i64,
    pub page_size: i64,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            search: None,
            industry: None,
            region: None,
            cost: None,
            tags: Vec::new(),
            sort: SortMode::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SearchQuery {
    /// Parse from a raw URL query string
    pub fn parse(query: Option<&str>) -> Result<Self> {
        let mut parsed = Self::default();

        let Some(query) = query else {
            return Ok(parsed);
        };

        for param in query.split('&') {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let value = urlencoding::decode(&value.replace('+', " "))
                .map_err(|e| CaselineError::Validation(format!("bad query encoding: {}", e)))?
                .into_owned();
            if value.is_empty() {
                continue;
            }

            match key {
                "search" => parsed.search = Some(value),
                "industry" => parsed.industry = Some(value),
                "region" => parsed.region = Some(value),
                "cost" => parsed.cost = Some(value),
                "tags" => {
                    parsed.tags = value
                        .split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect();
                }
                "sort" => parsed.sort = value.parse()?,
                "page" => {
                    parsed.page = value
                        .parse()
                        .map_err(|_| CaselineError::Validation(format!("invalid page: {}", value)))?;
                }
                "page_size" => {
                    parsed.page_size = value.parse().map_err(|_| {
                        CaselineError::Validation(format!("invalid page_size: {}", value))
                    })?;
                }
                _ => {}
            }
        }

        parsed.validate()?;
        Ok(parsed)
    }

    /// Enforce pagination bounds; out-of-range values are rejected, not clamped
    pub fn validate(&self) -> Result<()> {
        if self.page < 1 {
            return Err(CaselineError::Validation(format!(
                "page must be >= 1, got {}",
                self.page
            )));
        }
        if self.page_size < 1 || self.page_size > MAX_PAGE_SIZE {
            return Err(CaselineError::Validation(format!(
                "page_size must be in [1, {}], got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        Ok(())
    }

    /// Documents to skip for the requested page
    pub fn skip(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_query() {
        let q = SearchQuery::parse(Some(
            "search=welding+robot&industry=manufacturing&region=north&cost=low\
             &tags=automation,quality&sort=popularity&page=2&page_size=50",
        ))
        .unwrap();

        assert_eq!(q.search.as_deref(), Some("welding robot"));
        assert_eq!(q.industry.as_deref(), Some("manufacturing"));
        assert_eq!(q.tags, vec!["automation".to_string(), "quality".to_string()]);
        assert_eq!(q.sort, SortMode::Popularity);
        assert_eq!(q.page, 2);
        assert_eq!(q.skip(), 50);
    }

    #[test]
    fn test_empty_query_defaults() {
        let q = SearchQuery::parse(None).unwrap();
        assert_eq!(q.sort, SortMode::Relevance);
        assert_eq!(q.page, 1);
        assert_eq!(q.page_size, DEFAULT_PAGE_SIZE);
        assert!(q.search.is_none());
    }

    #[test]
    fn test_invalid_sort_rejected() {
        let err = SearchQuery::parse(Some("sort=trending")).unwrap_err();
        assert!(matches!(err, CaselineError::Validation(_)));
    }

    #[test]
    fn test_page_size_not_clamped() {
        assert!(SearchQuery::parse(Some("page_size=101")).is_err());
        assert!(SearchQuery::parse(Some("page_size=0")).is_err());
        assert!(SearchQuery::parse(Some("page_size=100")).is_ok());
        assert!(SearchQuery::parse(Some("page=0")).is_err());
    }

    #[test]
    fn test_unknown_params_ignored() {
        let q = SearchQuery::parse(Some("utm_source=mail&industry=logistics")).unwrap();
        assert_eq!(q.industry.as_deref(), Some("logistics"));
    }
}
