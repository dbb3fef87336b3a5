//! Domain DTOs exchanged between the history service and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transition::TransitionKind;

/// One page in the history store: a distinct url with aggregate visit data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSummary {
    /// Row identifier. Search results carry the page id; chunk listings
    /// carry the underlying visit id, since they are one row per visit.
    pub id: i64,
    /// The visited address.
    pub url: String,
    /// Page title, empty when none was ever recorded.
    #[serde(default)]
    pub title: String,
    /// Number of recorded visits to this url.
    pub visit_count: u32,
    /// Visits initiated by direct address-bar entry.
    pub typed_count: u32,
    /// Timestamp of the visit that created the page row.
    pub last_visit_time: DateTime<Utc>,
}

/// One recorded page-load event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitSummary {
    /// Visit row identifier.
    pub visit_id: i64,
    /// The page this visit belongs to.
    pub page_id: i64,
    /// The visit that navigated here, when part of a redirect chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referring_visit: Option<i64>,
    /// When the page load happened.
    pub visit_time: DateTime<Utc>,
    /// How the navigation was initiated.
    pub transition: TransitionKind,
}

/// Parameters for a history search. All fields are optional; the service
/// applies its defaults (100 results, a 24 hour window) for absent ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Substring matched against url or title, case-insensitively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Maximum number of results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
    /// Lower bound on last visit time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Upper bound on last visit time. Absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Deletion notification broadcast to every subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitsRemoved {
    /// True when the entire store was cleared.
    pub all_history: bool,
    /// Urls whose pages were removed.
    pub urls: Vec<String>,
}
