use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default page size of the explorer list views.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Immutable description of the list page currently requested.
///
/// Two queries are equivalent iff every field is equal; filters live in a
/// `BTreeMap` so equality and the rendered parameter order are both stable.
/// Derivation helpers return a new value and never mutate an issued one.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub filters: BTreeMap<String, String>,
    pub search: String,
    pub page: u32,
    pub page_size: u32,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            filters: BTreeMap::new(),
            search: String::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Query {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            ..Self::default()
        }
    }

    /// Set (or clear, with an empty value) one filter. Resets to the first page.
    pub fn with_filter(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        let value = value.into();
        let key = key.into();
        if value.is_empty() {
            next.filters.remove(&key);
        } else {
            next.filters.insert(key, value);
        }
        next.page = 1;
        next
    }

    /// Replace the search text. Resets to the first page.
    pub fn with_search(&self, search: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.search = search.into().trim().to_string();
        next.page = 1;
        next
    }

    pub fn with_page(&self, page: u32) -> Self {
        let mut next = self.clone();
        next.page = page.max(1);
        next
    }

    /// Query-string pairs for the collection endpoint.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut out = vec![
            ("page".to_string(), self.page.to_string()),
            ("page_size".to_string(), self.page_size.to_string()),
        ];
        if !self.search.is_empty() {
            out.push(("search".to_string(), self.search.clone()));
        }
        out.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }
}

/// One page of a remote collection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    pub total_pages: u32,
}

/// Registered agent as returned by the explorer's list endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reputation_score: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub token_id: Option<u64>,
}

/// Selection a scan job is launched with. The server keys the job by it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilters {
    pub network: Option<String>,
    pub limit: Option<u32>,
    pub force: bool,
}

impl ScanFilters {
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(network) = self.network.as_deref().filter(|n| !n.is_empty()) {
            out.push(("network".to_string(), network.to_string()));
        }
        if let Some(limit) = self.limit {
            out.push(("limit".to_string(), limit.to_string()));
        }
        if self.force {
            out.push(("force".to_string(), "true".to_string()));
        }
        out
    }
}

/// Response of the side-effect-free scan status endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStatus {
    pub is_scanning: bool,
    #[serde(default)]
    pub checked: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default, alias = "workingCount", alias = "working_count")]
    pub working: u64,
    #[serde(default)]
    pub current_agent: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

/// One message on the scan event stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Start {
        total: u64,
    },
    Progress {
        checked: u64,
        total: u64,
        #[serde(default, alias = "workingCount", alias = "working_count")]
        working: u64,
        #[serde(default)]
        agent_name: Option<String>,
        #[serde(default)]
        has_working: Option<bool>,
    },
    Complete {
        #[serde(default)]
        total: Option<u64>,
        #[serde(default)]
        checked: Option<u64>,
        #[serde(default, alias = "workingCount", alias = "working_count")]
        working: Option<u64>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl ScanEvent {
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_and_search_reset_page() {
        let q = Query::new(20).with_page(4);
        assert_eq!(q.with_filter("tab", "top").page, 1);
        assert_eq!(q.with_search("  trading ").search, "trading");
        assert_eq!(q.with_search("trading").page, 1);
        assert_eq!(q.with_page(0).page, 1);
    }

    #[test]
    fn empty_filter_value_removes_key() {
        let q = Query::default().with_filter("network", "sepolia");
        assert_eq!(q.filters.get("network").map(String::as_str), Some("sepolia"));
        assert!(q.with_filter("network", "").filters.is_empty());
    }

    #[test]
    fn equivalence_is_deep() {
        let a = Query::default().with_filter("tab", "all").with_search("x");
        let b = Query::default().with_search("x").with_filter("tab", "all");
        assert_eq!(a, b);
        assert_ne!(a, b.with_page(2));
    }

    #[test]
    fn params_skip_empty_search() {
        let q = Query::new(20).with_filter("tab", "new");
        assert_eq!(
            q.to_params(),
            vec![
                ("page".to_string(), "1".to_string()),
                ("page_size".to_string(), "20".to_string()),
                ("tab".to_string(), "new".to_string()),
            ]
        );
    }

    #[test]
    fn scan_filters_params() {
        let f = ScanFilters {
            network: Some("sepolia".into()),
            limit: None,
            force: true,
        };
        assert_eq!(
            f.to_params(),
            vec![
                ("network".to_string(), "sepolia".to_string()),
                ("force".to_string(), "true".to_string()),
            ]
        );
        assert!(ScanFilters::default().to_params().is_empty());
    }

    #[test]
    fn status_accepts_working_aliases() {
        let s: ScanStatus =
            serde_json::from_str(r#"{"is_scanning":true,"checked":3,"total":9,"workingCount":2}"#)
                .unwrap();
        assert_eq!(s.working, 2);
        let s: ScanStatus =
            serde_json::from_str(r#"{"is_scanning":false,"checked":9,"total":9,"working":4}"#)
                .unwrap();
        assert_eq!(s.working, 4);
        assert!(s.current_agent.is_none());
    }

    #[test]
    fn parse_stream_events() {
        assert_eq!(
            ScanEvent::parse(r#"{"type":"start","total":50}"#).unwrap(),
            ScanEvent::Start { total: 50 }
        );
        let ev = ScanEvent::parse(
            r#"{"type":"progress","checked":10,"total":50,"working":3,"agent_name":"a","has_working":true}"#,
        )
        .unwrap();
        assert!(matches!(ev, ScanEvent::Progress { checked: 10, working: 3, .. }));
        let ev = ScanEvent::parse(r#"{"type":"complete"}"#).unwrap();
        assert!(matches!(ev, ScanEvent::Complete { total: None, .. }));
        assert!(ScanEvent::parse(r#"{"type":"bogus"}"#).is_err());
        assert!(ScanEvent::parse("not json").is_err());
    }
}
