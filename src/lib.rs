//! Live-operation controllers for the agent explorer.
//!
//! - [`fetch::FetchCoordinator`]: paginated, filtered list queries where only the
//!   most recently submitted query may ever reach visible state.
//! - [`scan::ScanSession`]: starts, follows, cancels and (after a reload) resumes the
//!   server's endpoint-health scan job, refreshing the list when it completes.
pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod notify;
pub mod progress;
pub mod scan;
pub mod transport;
pub mod types;

pub use config::{ApiConfig, SessionConfig};
pub use error::{StreamError, TransportError};
pub use fetch::{FetchCoordinator, FetchRequest, ListState, Resolution};
pub use http::HttpTransport;
pub use notify::{ChannelNotifier, LogNotifier, Notice, NoticeLevel, Notifier};
pub use progress::{ObserveMode, ScanPhase, ScanProgress, Step};
pub use scan::{ChannelHandle, ScanSession};
pub use transport::{CollectionSource, Refresh, ScanEventStream, ScanSource};
pub use types::{AgentSummary, Page, Query, ScanEvent, ScanFilters, ScanStatus};
