#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Query as QueryParams, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use futures::{channel::mpsc as feed, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tower_http::trace::TraceLayer;

use explorer_live::{
    AgentSummary, CollectionSource, Page, Query, Refresh, ScanEvent, ScanEventStream,
    ScanFilters, ScanProgress, ScanSource, ScanStatus, StreamError, TransportError,
};

pub const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// collection fake: every fetch parks until the test replies

pub struct PendingFetch {
    pub query: Query,
    reply: oneshot::Sender<Result<Page<String>, TransportError>>,
}

impl PendingFetch {
    /// False when the coordinator already dropped the request.
    pub fn reply(self, result: Result<Page<String>, TransportError>) -> bool {
        self.reply.send(result).is_ok()
    }
}

pub struct ManualCollection {
    calls: mpsc::UnboundedSender<PendingFetch>,
}

impl ManualCollection {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PendingFetch>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { calls }), rx)
    }
}

#[async_trait]
impl CollectionSource<String> for ManualCollection {
    async fn fetch_page(&self, query: &Query) -> Result<Page<String>, TransportError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.calls.send(PendingFetch {
            query: query.clone(),
            reply,
        });
        rx.await
            .unwrap_or_else(|_| Err(TransportError::Stream("fake collection dropped".into())))
    }
}

pub fn names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}-{i}")).collect()
}

pub fn page_of(items: Vec<String>, total: u64, total_pages: u32) -> Page<String> {
    Page {
        items,
        total,
        page: 1,
        page_size: 20,
        total_pages,
    }
}

// ---------------------------------------------------------------------------
// scan fake: scripted statuses, test-fed event streams

pub type EventFeed = feed::UnboundedSender<Result<ScanEvent, StreamError>>;

pub struct ScriptedScan {
    statuses: Mutex<VecDeque<Result<ScanStatus, TransportError>>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    idle: ScanStatus,
    feeds: mpsc::UnboundedSender<EventFeed>,
    pub status_calls: AtomicUsize,
    pub opened: AtomicUsize,
    pub last_filters: Mutex<Option<ScanFilters>>,
}

impl ScriptedScan {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EventFeed>) {
        let (feeds, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                statuses: Mutex::new(VecDeque::new()),
                gate: Mutex::new(None),
                idle: ScanStatus::default(),
                feeds,
                status_calls: AtomicUsize::new(0),
                opened: AtomicUsize::new(0),
                last_filters: Mutex::new(None),
            }),
            rx,
        )
    }

    /// Queue status responses; once drained, `status()` reports an idle server.
    pub fn push_status(&self, status: Result<ScanStatus, TransportError>) {
        self.statuses.lock().push_back(status);
    }

    /// The next `status()` call parks until the returned sender fires (or drops).
    pub fn hold_next_status(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock() = Some(rx);
        tx
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanSource for ScriptedScan {
    async fn status(&self) -> Result<ScanStatus, TransportError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let next = self.statuses.lock().pop_front();
        next.unwrap_or_else(|| Ok(self.idle.clone()))
    }

    async fn open_stream(&self, filters: &ScanFilters) -> Result<ScanEventStream, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.last_filters.lock() = Some(filters.clone());
        let (tx, rx) = feed::unbounded();
        let _ = self.feeds.send(tx);
        Ok(rx.boxed())
    }
}

pub fn running(checked: u64, total: u64, working: u64) -> ScanStatus {
    ScanStatus {
        is_scanning: true,
        checked,
        total,
        working,
        ..ScanStatus::default()
    }
}

pub fn stopped(checked: u64, total: u64, working: u64) -> ScanStatus {
    ScanStatus {
        is_scanning: false,
        ..running(checked, total, working)
    }
}

pub fn progress(checked: u64, total: u64, working: u64) -> ScanEvent {
    ScanEvent::Progress {
        checked,
        total,
        working,
        agent_name: None,
        has_working: None,
    }
}

pub fn complete() -> ScanEvent {
    ScanEvent::Complete {
        total: None,
        checked: None,
        working: None,
        message: None,
    }
}

#[derive(Default)]
pub struct CountingRefresh {
    count: AtomicUsize,
}

impl CountingRefresh {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Refresh for CountingRefresh {
    fn refresh(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

pub async fn wait_until(
    rx: &mut watch::Receiver<ScanProgress>,
    done: impl FnMut(&ScanProgress) -> bool,
) -> ScanProgress {
    tokio::time::timeout(WAIT, rx.wait_for(done))
        .await
        .expect("timed out waiting for scan progress")
        .expect("session dropped")
        .clone()
}

// ---------------------------------------------------------------------------
// axum fake of the explorer API

#[derive(Clone)]
pub struct ApiState {
    inner: Arc<RwLock<ServerState>>,
}

#[derive(Debug, Default)]
struct ServerState {
    agents: Vec<AgentSummary>,
    status: ScanStatus,
    /// Raw `data:` payloads the next scan stream emits.
    frames: Vec<String>,
    stream_opens: usize,
    last_stream_params: HashMap<String, String>,
}

impl ApiState {
    pub fn new(agents: Vec<AgentSummary>, frames: Vec<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState {
                agents,
                frames,
                ..ServerState::default()
            })),
        }
    }

    pub async fn set_status(&self, status: ScanStatus) {
        self.inner.write().await.status = status;
    }

    pub async fn stream_opens(&self) -> usize {
        self.inner.read().await.stream_opens
    }

    pub async fn last_stream_params(&self) -> HashMap<String, String> {
        self.inner.read().await.last_stream_params.clone()
    }
}

pub fn agent(id: usize, name: &str) -> AgentSummary {
    AgentSummary {
        id: format!("agent-{id}"),
        name: name.to_string(),
        address: format!("0x{id:040x}"),
        description: String::new(),
        reputation_score: 50.0,
        status: "active".into(),
        network_id: "sepolia".into(),
        token_id: Some(id as u64),
    }
}

pub async fn spawn_api(state: ApiState) -> SocketAddr {
    let app = Router::new()
        .route("/api/agents", get(get_agents))
        .route("/endpoint-health/scan-status", get(get_scan_status))
        .route("/endpoint-health/scan-stream", get(get_scan_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake api");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await });
    addr
}

async fn get_agents(
    State(api): State<ApiState>,
    QueryParams(params): QueryParams<HashMap<String, String>>,
) -> impl IntoResponse {
    let search = params.get("search").cloned().unwrap_or_default();
    if search == "boom" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "message": "database unavailable" })),
        )
            .into_response();
    }
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let page_size: usize = params
        .get("page_size")
        .and_then(|p| p.parse().ok())
        .unwrap_or(20);

    let s = api.inner.read().await;
    let matching: Vec<AgentSummary> = s
        .agents
        .iter()
        .filter(|a| search.is_empty() || a.name.contains(&search))
        .cloned()
        .collect();
    let total = matching.len();
    let items: Vec<AgentSummary> = matching
        .into_iter()
        .skip((page.max(1) - 1) * page_size)
        .take(page_size)
        .collect();
    let out = Page {
        items,
        total: total as u64,
        page: page as u32,
        page_size: page_size as u32,
        total_pages: total.div_ceil(page_size) as u32,
    };
    (StatusCode::OK, Json(out)).into_response()
}

async fn get_scan_status(State(api): State<ApiState>) -> impl IntoResponse {
    let s = api.inner.read().await;
    (StatusCode::OK, Json(s.status.clone()))
}

async fn get_scan_stream(
    State(api): State<ApiState>,
    QueryParams(params): QueryParams<HashMap<String, String>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = {
        let mut s = api.inner.write().await;
        s.stream_opens += 1;
        s.last_stream_params = params;
        s.status.is_scanning = true;
        s.frames.clone()
    };

    let stream = futures::stream::iter(frames).then(move |frame| {
        let api = api.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if let Ok(event) = ScanEvent::parse(&frame) {
                let mut s = api.inner.write().await;
                match event {
                    ScanEvent::Start { total } => s.status.total = total,
                    ScanEvent::Progress {
                        checked, working, ..
                    } => {
                        s.status.checked = checked;
                        s.status.working = working;
                    }
                    ScanEvent::Complete { .. } => s.status.is_scanning = false,
                }
            }
            Ok(Event::default().data(frame))
        }
    });
    Sse::new(stream)
}
