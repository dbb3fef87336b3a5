//! The history service facade: search, visit listing, url recording, and
//! the deletion operations with their change notifications.
//!
//! One service instance owns the visit store for the whole process and is
//! handed by reference (or moved behind the bridge) to every caller; there
//! is no ambient global.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use retrace_shared::{
    HistoryError, PageSummary, Result, SearchQuery, Transition, TransitionKind, VisitSummary,
    VisitsRemoved,
};
use retrace_storage::VisitStore;

/// Results returned by [`HistoryService::search`] when the caller gives no
/// explicit maximum.
const DEFAULT_MAX_RESULTS: u32 = 100;

/// Search window when the caller gives no start time.
const DEFAULT_SEARCH_WINDOW_HOURS: i64 = 24;

/// Fixed page size for [`HistoryService::chunk`].
pub const CHUNK_SIZE: u32 = 32;

/// Capacity of the `visitRemoved` broadcast channel. A subscriber lagging
/// more than this many events behind misses the overflow.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The public operation surface of the history subsystem.
pub struct HistoryService {
    store: VisitStore,
    events: broadcast::Sender<VisitsRemoved>,
}

impl HistoryService {
    /// Wrap an opened visit store.
    pub fn new(store: VisitStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { store, events }
    }

    /// Subscribe to deletion notifications. Every mutating delete emits a
    /// [`VisitsRemoved`] to all subscribers, out of band with responses.
    pub fn subscribe(&self) -> broadcast::Receiver<VisitsRemoved> {
        self.events.subscribe()
    }

    /// Sender half of the event channel, for bridges that outlive `self`'s
    /// direct callers.
    pub(crate) fn event_sender(&self) -> broadcast::Sender<VisitsRemoved> {
        self.events.clone()
    }

    /// Search pages by text and time window, newest first.
    ///
    /// Defaults: 100 results, a window starting 24 hours ago, no upper
    /// bound. `text` matches url or title as a case-insensitive substring.
    #[instrument(skip_all)]
    pub async fn search(&mut self, query: &SearchQuery) -> Result<Vec<PageSummary>> {
        if let (Some(start), Some(end)) = (query.start_time, query.end_time) {
            if end < start {
                return Err(HistoryError::invalid_argument(
                    "search end time precedes start time",
                ));
            }
        }

        let limit = query.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        let start = query
            .start_time
            .unwrap_or_else(|| Utc::now() - Duration::hours(DEFAULT_SEARCH_WINDOW_HOURS));

        self.store
            .search_pages(query.text.as_deref(), limit, start, query.end_time)
            .await
    }

    /// All visits for a url, oldest first. An unknown url yields an empty
    /// list, never an error.
    pub async fn visits_for_url(&mut self, url: &str) -> Result<Vec<VisitSummary>> {
        match self.store.find_page_by_url(url).await? {
            Some(page) => self.store.visits_for_page(page.id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Record a page load: upsert the page row and append a visit stamped
    /// with chain-start and chain-end. The transition kind defaults to a
    /// followed link.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn add_url(
        &mut self,
        url: &str,
        title: Option<&str>,
        transition: Option<TransitionKind>,
    ) -> Result<()> {
        let title = title.unwrap_or("");
        let transition = Transition::navigation(transition.unwrap_or(TransitionKind::Link));
        let now = Utc::now();

        let page_id = self.store.upsert_page(url, title, now).await?;
        self.store.insert_visit(page_id, now, transition).await?;
        debug!(page_id, kind = %transition.kind, "recorded visit");
        Ok(())
    }

    /// Update a page's title. Unknown urls are a silent no-op.
    pub async fn set_title_for_url(&mut self, url: &str, title: &str) -> Result<()> {
        self.store.set_page_title(url, title).await
    }

    /// Delete a page and all of its visits. Unknown urls are an error, and
    /// a successful delete notifies subscribers.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn delete_url(&mut self, url: &str) -> Result<()> {
        let page = self
            .store
            .find_page_by_url(url)
            .await?
            .ok_or_else(|| HistoryError::not_found(url))?;

        self.store.delete_page_and_visits(page.id).await?;
        info!(page_id = page.id, "deleted url from history");
        self.emit(VisitsRemoved {
            all_history: false,
            urls: vec![url.to_string()],
        });
        Ok(())
    }

    /// Delete every page whose entire visit history falls inside
    /// `[start, end]`; pages with any visit outside the window are kept in
    /// full. Notifies subscribers with the removed urls, even when the
    /// window matched nothing.
    #[instrument(skip(self))]
    pub async fn delete_range(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        if end < start {
            return Err(HistoryError::invalid_argument(
                "delete range end time precedes start time",
            ));
        }

        let urls = self.store.delete_pages_in_range(start, end).await?;
        info!(deleted = urls.len(), "deleted history range");
        self.emit(VisitsRemoved {
            all_history: false,
            urls,
        });
        Ok(())
    }

    /// Clear the entire store and notify subscribers with everything that
    /// was in it.
    #[instrument(skip(self))]
    pub async fn delete_all(&mut self) -> Result<()> {
        let urls = self.store.delete_all_pages().await?;
        info!(deleted = urls.len(), "cleared all history");
        self.emit(VisitsRemoved {
            all_history: true,
            urls,
        });
        Ok(())
    }

    /// One fixed-size page of the recency feed: link-transition visits
    /// joined to their pages, newest first, 32 per chunk.
    pub async fn chunk(&mut self, offset: u32) -> Result<Vec<PageSummary>> {
        self.store
            .recent_link_visits(u64::from(offset) * u64::from(CHUNK_SIZE), CHUNK_SIZE)
            .await
    }

    fn emit(&self, event: VisitsRemoved) {
        // send fails only when no subscriber exists.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_DB_SEQ: AtomicU64 = AtomicU64::new(0);

    fn temp_db_path(tag: &str) -> PathBuf {
        let seq = TEST_DB_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "retrace_svc_{tag}_{}_{seq}.db",
            std::process::id()
        ));
        // Stale files from a previous run would leak rows into the test.
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn test_service(tag: &str) -> HistoryService {
        let store = VisitStore::open(&temp_db_path(tag)).await.expect("open test db");
        HistoryService::new(store)
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).expect("timestamp in range")
    }

    const T0: i64 = 1_700_000_000_000;

    /// Seed a page with one visit at an explicit time, bypassing the
    /// wall-clock stamping of `add_url`.
    async fn seed_visit(service: &mut HistoryService, url: &str, title: &str, time: DateTime<Utc>) {
        let page_id = service
            .store
            .upsert_page(url, title, time)
            .await
            .expect("seed page");
        service
            .store
            .insert_visit(page_id, time, Transition::navigation(TransitionKind::Link))
            .await
            .expect("seed visit");
    }

    #[tokio::test]
    async fn double_add_increments_visit_count_and_keeps_url_unique() {
        let mut service = test_service("double_add").await;

        service
            .add_url("https://a.test", Some("A"), None)
            .await
            .expect("first add");
        service
            .add_url("https://a.test", Some("A2"), None)
            .await
            .expect("second add");

        let results = service.search(&SearchQuery::default()).await.expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://a.test");
        assert_eq!(results[0].title, "A2");
        assert_eq!(results[0].visit_count, 2);
    }

    #[tokio::test]
    async fn add_records_one_visit_per_call() {
        let mut service = test_service("add_visits").await;

        service
            .add_url("https://a.test", None, Some(TransitionKind::Typed))
            .await
            .expect("typed add");
        service
            .add_url("https://a.test", None, None)
            .await
            .expect("link add");

        let visits = service.visits_for_url("https://a.test").await.expect("visits");
        assert_eq!(visits.len(), 2);
        assert_eq!(visits[0].transition, TransitionKind::Typed);
        assert_eq!(visits[1].transition, TransitionKind::Link);
        for pair in visits.windows(2) {
            assert!(pair[0].visit_time <= pair[1].visit_time);
        }
    }

    #[tokio::test]
    async fn visits_for_unknown_url_is_empty_not_an_error() {
        let mut service = test_service("unknown_visits").await;
        let visits = service
            .visits_for_url("https://never.test")
            .await
            .expect("lookup");
        assert!(visits.is_empty());
    }

    #[tokio::test]
    async fn search_default_window_hides_old_pages() {
        let mut service = test_service("default_window").await;
        // Two days old, outside the default 24 hour window.
        let stale = Utc::now() - Duration::hours(48);
        seed_visit(&mut service, "https://stale.test", "Stale", stale).await;
        service
            .add_url("https://fresh.test", Some("Fresh"), None)
            .await
            .expect("add");

        let results = service.search(&SearchQuery::default()).await.expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://fresh.test");

        // An explicit start pulls the stale page back in.
        let all = service
            .search(&SearchQuery {
                start_time: Some(Utc::now() - Duration::hours(72)),
                ..Default::default()
            })
            .await
            .expect("search with start");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn search_rejects_inverted_explicit_range() {
        let mut service = test_service("inverted_search").await;
        let result = service
            .search(&SearchQuery {
                start_time: Some(at(T0 + 1_000)),
                end_time: Some(at(T0)),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(HistoryError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn set_title_renames_known_and_ignores_unknown() {
        let mut service = test_service("set_title").await;
        service
            .add_url("https://a.test", Some("A"), None)
            .await
            .expect("add");

        service
            .set_title_for_url("https://a.test", "Renamed")
            .await
            .expect("rename");
        service
            .set_title_for_url("https://unknown.test", "Ignored")
            .await
            .expect("no-op");

        let results = service.search(&SearchQuery::default()).await.expect("search");
        assert_eq!(results[0].title, "Renamed");
    }

    #[tokio::test]
    async fn delete_url_removes_page_and_notifies() {
        let mut service = test_service("delete_url").await;
        let mut events = service.subscribe();
        service
            .add_url("https://a.test", Some("A"), None)
            .await
            .expect("add");

        service.delete_url("https://a.test").await.expect("delete");

        let event = events.try_recv().expect("event emitted");
        assert!(!event.all_history);
        assert_eq!(event.urls, vec!["https://a.test"]);

        assert!(service
            .visits_for_url("https://a.test")
            .await
            .expect("visits")
            .is_empty());
        assert!(service
            .search(&SearchQuery::default())
            .await
            .expect("search")
            .is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_url_is_not_found() {
        let mut service = test_service("delete_unknown").await;
        let result = service.delete_url("https://never.test").await;
        assert!(matches!(result, Err(HistoryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn delete_range_removes_covered_pages_and_notifies() {
        let mut service = test_service("delete_range").await;
        seed_visit(&mut service, "https://t1.test", "T1", at(T0)).await;
        seed_visit(&mut service, "https://t2.test", "T2", at(T0 + 1_000)).await;
        seed_visit(&mut service, "https://t3.test", "T3", at(T0 + 2_000)).await;

        let mut events = service.subscribe();
        service
            .delete_range(at(T0), at(T0 + 1_000))
            .await
            .expect("range delete");

        let event = events.try_recv().expect("event emitted");
        assert!(!event.all_history);
        let mut urls = event.urls.clone();
        urls.sort();
        assert_eq!(urls, vec!["https://t1.test", "https://t2.test"]);

        let remaining = service
            .search(&SearchQuery {
                start_time: Some(at(0)),
                ..Default::default()
            })
            .await
            .expect("search");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].url, "https://t3.test");
    }

    #[tokio::test]
    async fn delete_range_rejects_inverted_bounds() {
        let mut service = test_service("range_inverted").await;
        let result = service.delete_range(at(T0 + 1_000), at(T0)).await;
        assert!(matches!(result, Err(HistoryError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn delete_all_clears_store_and_notifies_with_all_urls() {
        let mut service = test_service("delete_all").await;
        service
            .add_url("https://a.test", Some("A"), None)
            .await
            .expect("add a");
        service
            .add_url("https://b.test", Some("B"), None)
            .await
            .expect("add b");

        let mut events = service.subscribe();
        service.delete_all().await.expect("clear");

        let event = events.try_recv().expect("event emitted");
        assert!(event.all_history);
        let mut urls = event.urls.clone();
        urls.sort();
        assert_eq!(urls, vec!["https://a.test", "https://b.test"]);

        assert!(service
            .search(&SearchQuery::default())
            .await
            .expect("search")
            .is_empty());
    }

    #[tokio::test]
    async fn chunk_pages_through_the_link_feed() {
        let mut service = test_service("chunk").await;
        let page_id = service
            .store
            .upsert_page("https://feed.test", "Feed", at(T0))
            .await
            .expect("page");
        for i in 0..40 {
            service
                .store
                .insert_visit(
                    page_id,
                    at(T0 + i * 1_000),
                    Transition::navigation(TransitionKind::Link),
                )
                .await
                .expect("visit");
        }

        let first = service.chunk(0).await.expect("chunk 0");
        assert_eq!(first.len(), CHUNK_SIZE as usize);
        let second = service.chunk(1).await.expect("chunk 1");
        assert_eq!(second.len(), 8);
        let third = service.chunk(2).await.expect("chunk 2");
        assert!(third.is_empty());
    }
}
