//! Configuration shared between the library crates and the server

use serde::{Deserialize, Serialize};

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 20,
            min_connections: 2,
        }
    }
}

/// Common pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationParams {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: Some(1),
            page_size: Some(20),
            sort_by: Some("last_seen".to_string()),
            sort_order: Some("desc".to_string()),
        }
    }
}

impl PaginationParams {
    /// Returns `(page, page_size)` with page >= 1 and page_size within 1..=100
    pub fn normalize(&self) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let page_size = self.page_size.unwrap_or(20).clamp(1, 100);
        (page, page_size)
    }

    /// Row offset for the normalized page
    pub fn offset(&self) -> u64 {
        let (page, page_size) = self.normalize();
        (page - 1) * page_size
    }

    pub fn is_ascending(&self) -> bool {
        self.sort_order
            .as_deref()
            .map(|order| order.eq_ignore_ascii_case("asc"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_normalize_clamps() {
        let params = PaginationParams {
            page: Some(0),
            page_size: Some(500),
            sort_by: None,
            sort_order: None,
        };
        assert_eq!(params.normalize(), (1, 100));

        let params = PaginationParams {
            page: Some(3),
            page_size: Some(0),
            sort_by: None,
            sort_order: Some("ASC".to_string()),
        };
        assert_eq!(params.normalize(), (3, 1));
        assert_eq!(params.offset(), 2);
        assert!(params.is_ascending());
    }

    #[test]
    fn test_pagination_defaults() {
        let params = PaginationParams::default();
        assert_eq!(params.normalize(), (1, 20));
        assert_eq!(params.offset(), 0);
        assert!(!params.is_ascending());
    }
}
