//! Last-writer-wins list fetching.
//!
//! Each submitted [`Query`] gets a [`FetchRequest`] carrying its own
//! `CancellationToken`. Issuing a new request cancels the previous one before the
//! reference is replaced, so at most one live token exists per coordinator and only
//! the holder of that token may write [`ListState`]. Arrival order of responses is
//! irrelevant: a cancelled request resolves to [`Resolution::Superseded`] and
//! touches nothing, not even the loading flag.

use std::sync::Arc;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::{CollectionSource, Refresh};
use crate::types::{Page, Query};

/// One issuance of a query against the collection endpoint.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    query: Query,
    token: CancellationToken,
}

impl FetchRequest {
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// False once superseded, torn down, or resolved.
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }
}

/// What happened to a response handed to [`FetchCoordinator::on_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    /// Transport failure recorded; previous items stay visible.
    Failed,
    /// The request was cancelled first. Not an error.
    Superseded,
}

/// Visible list state. Only the coordinator writes it.
#[derive(Debug, Clone)]
pub struct ListState<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub total_pages: u32,
    pub page: u32,
    /// Query the visible items answer.
    pub query: Option<Query>,
    pub loading: bool,
    pub error: Option<String>,
    /// Whether `error` came from a failure worth retrying (5xx, connection-level).
    pub retryable: bool,
    pub updated_at: Option<OffsetDateTime>,
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            total_pages: 0,
            page: 1,
            query: None,
            loading: false,
            error: None,
            retryable: false,
            updated_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct Control {
    in_flight: Option<FetchRequest>,
    /// Most recently submitted query, visible or not.
    current: Option<Query>,
}

struct Shared<T> {
    control: Mutex<Control>,
    state: watch::Sender<ListState<T>>,
}

impl<T> Shared<T> {
    fn resolve(&self, request: &FetchRequest, result: Result<Page<T>, TransportError>) -> Resolution {
        let mut control = self.control.lock();
        if request.token.is_cancelled() {
            return Resolution::Superseded;
        }
        // A live token is always the in-flight one; retire it so a duplicate
        // callback cannot apply twice.
        request.token.cancel();
        control.in_flight = None;

        match result {
            Ok(page) => {
                let page_no = if page.page == 0 { request.query.page } else { page.page };
                self.state.send_modify(|s| {
                    s.items = page.items;
                    s.total = page.total;
                    s.total_pages = page.total_pages;
                    s.page = page_no;
                    s.query = Some(request.query.clone());
                    s.loading = false;
                    s.error = None;
                    s.retryable = false;
                    s.updated_at = Some(OffsetDateTime::now_utc());
                });
                Resolution::Applied
            }
            Err(e) => {
                warn!(error = %e, page = request.query.page, "list fetch failed");
                self.state.send_modify(|s| {
                    s.loading = false;
                    s.error = Some(e.to_string());
                    s.retryable = e.is_retryable();
                });
                Resolution::Failed
            }
        }
    }

    fn release(&self) {
        if let Some(request) = self.control.lock().in_flight.take() {
            request.token.cancel();
        }
    }
}

pub struct FetchCoordinator<T> {
    shared: Arc<Shared<T>>,
    source: Arc<dyn CollectionSource<T>>,
    page_size: u32,
}

impl<T> FetchCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(source: Arc<dyn CollectionSource<T>>, page_size: u32) -> Self {
        let (state, _) = watch::channel(ListState::default());
        Self {
            shared: Arc::new(Shared {
                control: Mutex::new(Control::default()),
                state,
            }),
            source,
            page_size: page_size.max(1),
        }
    }

    /// Request `query`. An equivalent in-flight request is left alone; any other is
    /// cancelled and replaced. The loading flag rises before this returns.
    pub fn submit(&self, query: Query) {
        let request = {
            let mut control = self.shared.control.lock();
            if let Some(pending) = control.in_flight.as_ref() {
                if pending.query == query && pending.is_live() {
                    return;
                }
            }
            self.issue(&mut control, query)
        };
        self.spawn(request);
    }

    /// Re-issue the last submitted query even if an equivalent one is in flight.
    pub fn refresh(&self) {
        let request = {
            let mut control = self.shared.control.lock();
            let Some(query) = control.current.clone() else {
                return;
            };
            self.issue(&mut control, query)
        };
        self.spawn(request);
    }

    /// Result callback. A no-op for any request that is no longer live.
    pub fn on_result(
        &self,
        request: &FetchRequest,
        result: Result<Page<T>, TransportError>,
    ) -> Resolution {
        self.shared.resolve(request, result)
    }

    /// Cancel whatever is outstanding. Must run when the owning view goes away;
    /// dropping the coordinator does it too.
    pub fn teardown(&self) {
        self.shared.release();
    }

    pub fn state(&self) -> ListState<T> {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListState<T>> {
        self.shared.state.subscribe()
    }

    pub fn current_request(&self) -> Option<FetchRequest> {
        self.shared.control.lock().in_flight.clone()
    }

    pub fn query(&self) -> Query {
        self.shared
            .control
            .lock()
            .current
            .clone()
            .unwrap_or_else(|| Query::new(self.page_size))
    }

    pub fn set_search(&self, search: &str) {
        self.submit(self.query().with_search(search));
    }

    pub fn set_filter(&self, key: &str, value: &str) {
        self.submit(self.query().with_filter(key, value));
    }

    /// Go to `page`, clamped to the page count of the visible result when known.
    pub fn goto_page(&self, page: u32) {
        let total_pages = self.shared.state.borrow().total_pages;
        let page = if total_pages > 0 { page.min(total_pages) } else { page };
        self.submit(self.query().with_page(page));
    }

    pub fn next_page(&self) {
        let page = self.query().page;
        self.goto_page(page.saturating_add(1));
    }

    pub fn prev_page(&self) {
        let page = self.query().page;
        self.goto_page(page.saturating_sub(1).max(1));
    }

    fn issue(&self, control: &mut Control, query: Query) -> FetchRequest {
        if let Some(stale) = control.in_flight.take() {
            stale.token.cancel();
        }
        debug!(page = query.page, search = %query.search, "issuing list fetch");
        let request = FetchRequest {
            query: query.clone(),
            token: CancellationToken::new(),
        };
        control.current = Some(query);
        control.in_flight = Some(request.clone());
        self.shared.state.send_modify(|s| s.loading = true);
        request
    }

    fn spawn(&self, request: FetchRequest) {
        let shared = Arc::clone(&self.shared);
        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            tokio::select! {
                // Dropping the fetch future aborts the underlying request.
                _ = request.token.cancelled() => {}
                result = source.fetch_page(&request.query) => {
                    shared.resolve(&request, result);
                }
            }
        });
    }
}

impl<T> Refresh for FetchCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn refresh(&self) {
        FetchCoordinator::refresh(self);
    }
}

impl<T> Drop for FetchCoordinator<T> {
    fn drop(&mut self) {
        self.shared.release();
    }
}
