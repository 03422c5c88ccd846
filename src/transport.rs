//! Seams between the controllers and the explorer API.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{StreamError, TransportError};
use crate::types::{Page, Query, ScanEvent, ScanFilters, ScanStatus};

/// Stream of decoded scan events. Dropping it closes the channel.
pub type ScanEventStream = BoxStream<'static, Result<ScanEvent, StreamError>>;

/// Paginated, filterable remote collection.
///
/// The returned future may be dropped at any await point; implementations must
/// treat that as the caller aborting the request.
#[async_trait]
pub trait CollectionSource<T>: Send + Sync + 'static {
    async fn fetch_page(&self, query: &Query) -> Result<Page<T>, TransportError>;
}

/// Server-side scan job endpoints.
#[async_trait]
pub trait ScanSource: Send + Sync + 'static {
    /// Idempotent job status; safe to poll.
    async fn status(&self) -> Result<ScanStatus, TransportError>;

    /// Open the live event channel. The server starts a new job when this is opened.
    async fn open_stream(&self, filters: &ScanFilters) -> Result<ScanEventStream, TransportError>;
}

/// Re-issue whatever query is currently visible.
pub trait Refresh: Send + Sync {
    fn refresh(&self);
}
