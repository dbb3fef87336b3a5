//! Channel bridge for the history service.
//!
//! The service loop owns the [`HistoryService`] (and with it the store's
//! single logical connection); callers hold a cloneable [`HistoryHandle`]
//! and reach the loop through a bounded request channel. Every operation
//! is one request/response round trip carrying a oneshot responder;
//! `visitRemoved` notifications travel out of band on the service's
//! broadcast channel.

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use retrace_shared::{
    HistoryError, PageSummary, Result, SearchQuery, TransitionKind, VisitSummary, VisitsRemoved,
};

use crate::service::HistoryService;

/// Pending requests before senders are backpressured.
const REQUEST_QUEUE_SIZE: usize = 64;

/// One variant per facade operation. Adding an operation extends this enum
/// and the loop's match, which the compiler checks exhaustively.
enum HistoryRequest {
    Search {
        query: SearchQuery,
        respond: oneshot::Sender<Result<Vec<PageSummary>>>,
    },
    Visits {
        url: String,
        respond: oneshot::Sender<Result<Vec<VisitSummary>>>,
    },
    AddUrl {
        url: String,
        title: Option<String>,
        transition: Option<TransitionKind>,
        respond: oneshot::Sender<Result<()>>,
    },
    SetTitle {
        url: String,
        title: String,
        respond: oneshot::Sender<Result<()>>,
    },
    DeleteUrl {
        url: String,
        respond: oneshot::Sender<Result<()>>,
    },
    DeleteRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        respond: oneshot::Sender<Result<()>>,
    },
    DeleteAll {
        respond: oneshot::Sender<Result<()>>,
    },
    Chunk {
        offset: u32,
        respond: oneshot::Sender<Result<Vec<PageSummary>>>,
    },
}

/// Client side of the bridge. Cheap to clone; all clones feed the same
/// service loop.
#[derive(Clone)]
pub struct HistoryHandle {
    requests: mpsc::Sender<HistoryRequest>,
    events: broadcast::Sender<VisitsRemoved>,
}

/// Move `service` onto its own task and return the handle callers use to
/// reach it. The loop stops when every handle clone is dropped.
pub fn spawn(service: HistoryService) -> (HistoryHandle, JoinHandle<()>) {
    let (requests, inbox) = mpsc::channel(REQUEST_QUEUE_SIZE);
    let events = service.event_sender();
    let worker = tokio::spawn(service_loop(service, inbox));
    (HistoryHandle { requests, events }, worker)
}

async fn service_loop(mut service: HistoryService, mut inbox: mpsc::Receiver<HistoryRequest>) {
    while let Some(request) = inbox.recv().await {
        // A dropped responder means the caller went away; nothing to do.
        match request {
            HistoryRequest::Search { query, respond } => {
                let _ = respond.send(service.search(&query).await);
            }
            HistoryRequest::Visits { url, respond } => {
                let _ = respond.send(service.visits_for_url(&url).await);
            }
            HistoryRequest::AddUrl {
                url,
                title,
                transition,
                respond,
            } => {
                let _ = respond.send(service.add_url(&url, title.as_deref(), transition).await);
            }
            HistoryRequest::SetTitle {
                url,
                title,
                respond,
            } => {
                let _ = respond.send(service.set_title_for_url(&url, &title).await);
            }
            HistoryRequest::DeleteUrl { url, respond } => {
                let _ = respond.send(service.delete_url(&url).await);
            }
            HistoryRequest::DeleteRange {
                start,
                end,
                respond,
            } => {
                let _ = respond.send(service.delete_range(start, end).await);
            }
            HistoryRequest::DeleteAll { respond } => {
                let _ = respond.send(service.delete_all().await);
            }
            HistoryRequest::Chunk { offset, respond } => {
                let _ = respond.send(service.chunk(offset).await);
            }
        }
    }
    debug!("history service loop stopped");
}

impl HistoryHandle {
    /// Subscribe to `visitRemoved` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<VisitsRemoved> {
        self.events.subscribe()
    }

    /// Search pages by text and time window, newest first.
    pub async fn search(&self, query: SearchQuery) -> Result<Vec<PageSummary>> {
        self.round_trip(|respond| HistoryRequest::Search { query, respond })
            .await
    }

    /// All visits for a url, oldest first; empty for an unknown url.
    pub async fn visits_for_url(&self, url: impl Into<String>) -> Result<Vec<VisitSummary>> {
        let url = url.into();
        self.round_trip(|respond| HistoryRequest::Visits { url, respond })
            .await
    }

    /// Record a page load.
    pub async fn add_url(
        &self,
        url: impl Into<String>,
        title: Option<String>,
        transition: Option<TransitionKind>,
    ) -> Result<()> {
        let url = url.into();
        self.round_trip(|respond| HistoryRequest::AddUrl {
            url,
            title,
            transition,
            respond,
        })
        .await
    }

    /// Update a page's title; a silent no-op for unknown urls.
    pub async fn set_title_for_url(
        &self,
        url: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<()> {
        let url = url.into();
        let title = title.into();
        self.round_trip(|respond| HistoryRequest::SetTitle {
            url,
            title,
            respond,
        })
        .await
    }

    /// Delete a page and its visits; `NotFound` for unknown urls.
    pub async fn delete_url(&self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        self.round_trip(|respond| HistoryRequest::DeleteUrl { url, respond })
            .await
    }

    /// Delete every page fully covered by `[start, end]`.
    pub async fn delete_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        self.round_trip(|respond| HistoryRequest::DeleteRange {
            start,
            end,
            respond,
        })
        .await
    }

    /// Clear the entire store.
    pub async fn delete_all(&self) -> Result<()> {
        self.round_trip(|respond| HistoryRequest::DeleteAll { respond })
            .await
    }

    /// One fixed-size page of the recency feed.
    pub async fn chunk(&self, offset: u32) -> Result<Vec<PageSummary>> {
        self.round_trip(|respond| HistoryRequest::Chunk { offset, respond })
            .await
    }

    async fn round_trip<T>(
        &self,
        make_request: impl FnOnce(oneshot::Sender<Result<T>>) -> HistoryRequest,
    ) -> Result<T> {
        let (respond, response) = oneshot::channel();
        self.requests
            .send(make_request(respond))
            .await
            .map_err(|_| HistoryError::storage("history service unavailable"))?;
        response
            .await
            .map_err(|_| HistoryError::storage("history service dropped the request"))?
    }
}
