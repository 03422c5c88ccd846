//! Client-side driver/observer of the server's endpoint-health scan job.
//!
//! The session owns at most one channel at a time: either the live event stream
//! it opened itself, or a status-polling loop attached to a job that was already
//! running (the resume path after a reload; re-opening the stream would start a
//! second job). Each channel is identified by a [`ChannelHandle`]; callbacks
//! carrying a released handle are no-ops. Cancelling only detaches this observer,
//! the server job keeps going.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{StreamError, TransportError};
use crate::notify::{Notice, NoticeLevel, Notifier};
use crate::progress::{ObserveMode, ScanPhase, ScanProgress, Step};
use crate::transport::{Refresh, ScanSource};
use crate::types::{ScanEvent, ScanFilters, ScanStatus};

/// Identity of one attached channel.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    token: CancellationToken,
    mode: ObserveMode,
}

impl ChannelHandle {
    pub fn mode(&self) -> ObserveMode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct Control {
    channel: Option<ChannelHandle>,
    filters: Option<ScanFilters>,
}

struct Inner {
    source: Arc<dyn ScanSource>,
    refresh: Option<Arc<dyn Refresh>>,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
    control: Mutex<Control>,
    progress: watch::Sender<ScanProgress>,
}

impl Inner {
    fn phase(&self) -> ScanPhase {
        self.progress.borrow().phase
    }

    /// Cancel the current channel, then install a fresh one.
    fn install(&self, control: &mut Control, mode: ObserveMode) -> ChannelHandle {
        Self::release(control);
        let handle = ChannelHandle {
            token: CancellationToken::new(),
            mode,
        };
        control.channel = Some(handle.clone());
        handle
    }

    fn release(control: &mut Control) {
        if let Some(handle) = control.channel.take() {
            handle.token.cancel();
        }
    }

    fn transition(&self, apply: impl FnOnce(&mut ScanProgress) -> Step) -> Step {
        let mut step = Step::Ignored;
        self.progress.send_if_modified(|p| {
            step = apply(p);
            step != Step::Ignored
        });
        step
    }

    fn on_event(&self, handle: &ChannelHandle, event: &ScanEvent) -> Step {
        let step = {
            let mut control = self.control.lock();
            if !handle.is_live() {
                return Step::Ignored;
            }
            let step = self.transition(|p| p.apply_event(event));
            if step == Step::Finished {
                Self::release(&mut control);
            }
            step
        };
        if step == Step::Finished {
            self.finished();
        }
        step
    }

    fn on_status(&self, handle: &ChannelHandle, status: &ScanStatus) -> Step {
        let step = {
            let mut control = self.control.lock();
            if !handle.is_live() {
                return Step::Ignored;
            }
            let step = self.transition(|p| p.apply_status(status));
            if step == Step::Finished {
                Self::release(&mut control);
            }
            step
        };
        if step == Step::Finished {
            self.finished();
        }
        step
    }

    fn on_error(&self, handle: &ChannelHandle, error: &TransportError) -> Step {
        {
            let mut control = self.control.lock();
            if !handle.is_live() {
                return Step::Ignored;
            }
            self.transition(|p| p.fail(error.to_string(), error.is_retryable()));
            Self::release(&mut control);
        }
        warn!(error = %error, mode = ?handle.mode, "scan channel failed");
        self.notifier.notify(Notice::new(
            NoticeLevel::Error,
            format!("Scan failed: {error}"),
        ));
        Step::Applied
    }

    fn finished(&self) {
        let p = self.progress.borrow().clone();
        info!(checked = p.checked, total = p.total, working = p.working, "scan completed");
        self.notifier.notify(Notice::new(
            NoticeLevel::Success,
            format!(
                "Scan complete: {} of {} checked, {} working",
                p.checked, p.total, p.working
            ),
        ));
        if let Some(refresh) = &self.refresh {
            refresh.refresh();
        }
    }

    /// Swap the pending handle of a status check for a polling channel on the
    /// job the server reports as running. False if the check was released first.
    fn follow(self: &Arc<Self>, pending: &ChannelHandle, status: &ScanStatus) -> bool {
        let handle = {
            let mut control = self.control.lock();
            if !pending.is_live() {
                return false;
            }
            self.transition(|p| p.resume(status));
            self.install(&mut control, ObserveMode::Polling)
        };
        info!(
            checked = status.checked,
            total = status.total,
            "attaching to running scan by polling"
        );
        tokio::spawn(run_polling(Arc::clone(self), handle));
        true
    }

    /// Give up a pending status check and put back the record it replaced.
    fn restore(&self, pending: &ChannelHandle, previous: ScanProgress) {
        let mut control = self.control.lock();
        if !pending.is_live() {
            return;
        }
        Self::release(&mut control);
        self.progress.send_replace(previous);
    }

    /// Move to `Starting` and install the handle that guards the status check.
    fn pending(&self, mode: ObserveMode) -> Option<(ChannelHandle, ScanProgress)> {
        let mut control = self.control.lock();
        let previous = self.progress.borrow().clone();
        let step = self.transition(|p| {
            let step = p.begin();
            if step == Step::Applied {
                p.mode = Some(mode);
            }
            step
        });
        if step == Step::Ignored {
            return None;
        }
        Some((self.install(&mut control, mode), previous))
    }
}

async fn run_live(inner: Arc<Inner>, handle: ChannelHandle, filters: ScanFilters) {
    let opened = tokio::select! {
        biased;
        _ = handle.token.cancelled() => return,
        opened = inner.source.open_stream(&filters) => opened,
    };
    let mut events = match opened {
        Ok(events) => events,
        Err(e) => {
            inner.on_error(&handle, &e);
            return;
        }
    };

    loop {
        // Returning drops `events`, which closes the channel.
        let next = tokio::select! {
            biased;
            _ = handle.token.cancelled() => return,
            next = events.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                if inner.on_event(&handle, &event) == Step::Finished {
                    return;
                }
            }
            Some(Err(StreamError::Malformed { data, source })) => {
                warn!(%data, error = %source, "dropping malformed scan event");
            }
            Some(Err(StreamError::Transport(e))) => {
                inner.on_error(&handle, &e);
                return;
            }
            None => {
                inner.on_error(&handle, &TransportError::StreamClosed);
                return;
            }
        }
    }
}

async fn run_polling(inner: Arc<Inner>, handle: ChannelHandle) {
    let period = inner.poll_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while handle.is_live() {
        tokio::select! {
            biased;
            _ = handle.token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let polled = tokio::select! {
            biased;
            _ = handle.token.cancelled() => return,
            polled = inner.source.status() => polled,
        };
        match polled {
            Ok(status) => {
                if inner.on_status(&handle, &status) == Step::Finished {
                    return;
                }
            }
            Err(e) => {
                inner.on_error(&handle, &e);
                return;
            }
        }
    }
}

/// Observer/driver of one server-side scan job, owned by a single view.
pub struct ScanSession {
    inner: Arc<Inner>,
}

impl ScanSession {
    pub fn new(
        source: Arc<dyn ScanSource>,
        refresh: Option<Arc<dyn Refresh>>,
        notifier: Arc<dyn Notifier>,
        config: &SessionConfig,
    ) -> Self {
        let (progress, _) = watch::channel(ScanProgress::default());
        Self {
            inner: Arc::new(Inner {
                source,
                refresh,
                notifier,
                poll_interval: config.poll_interval(),
                control: Mutex::new(Control::default()),
                progress,
            }),
        }
    }

    /// Resume-after-reload: ask the server whether a job is running and, if so,
    /// follow it by polling. Returns whether a job was attached.
    ///
    /// The session is `Starting` while the check is out; `cancel` or `teardown`
    /// in that window leave nothing attached.
    pub async fn attach(&self) -> bool {
        let Some((pending, previous)) = self.inner.pending(ObserveMode::Polling) else {
            return false;
        };
        let checked = tokio::select! {
            biased;
            _ = pending.token.cancelled() => return false,
            checked = self.inner.source.status() => checked,
        };
        match checked {
            Ok(status) if status.is_scanning => self.inner.follow(&pending, &status),
            Ok(_) => {
                self.inner.restore(&pending, previous);
                false
            }
            Err(e) => {
                if !pending.is_live() {
                    return false;
                }
                self.inner.restore(&pending, previous);
                warn!(error = %e, "scan status check failed");
                self.inner.notifier.notify(Notice::new(
                    NoticeLevel::Warning,
                    format!("Could not check scan status: {e}"),
                ));
                false
            }
        }
    }

    /// Start a scan for `filters`, or join the one already running on the server.
    ///
    /// Moves to `Starting` before the status check so the check can be cancelled;
    /// the stream is only opened if the check's handle is still live afterwards.
    pub async fn start(&self, filters: ScanFilters) {
        let Some((handle, _)) = self.inner.pending(ObserveMode::Live) else {
            debug!("scan already active, start ignored");
            return;
        };
        self.inner.control.lock().filters = Some(filters.clone());

        let checked = tokio::select! {
            biased;
            _ = handle.token.cancelled() => return,
            checked = self.inner.source.status() => checked,
        };
        match checked {
            Ok(status) if status.is_scanning => {
                self.inner.follow(&handle, &status);
            }
            Ok(_) => {
                if !handle.is_live() {
                    return;
                }
                info!(?filters, "starting scan");
                tokio::spawn(run_live(Arc::clone(&self.inner), handle, filters));
            }
            Err(e) => {
                self.inner.on_error(&handle, &e);
            }
        }
    }

    /// Stop listening. The server job is not aborted.
    pub fn cancel(&self) -> bool {
        let step = {
            let mut control = self.inner.control.lock();
            let step = self.inner.transition(ScanProgress::cancel);
            if step == Step::Applied {
                Inner::release(&mut control);
            }
            step
        };
        if step != Step::Applied {
            return false;
        }
        self.inner.notifier.notify(Notice::new(
            NoticeLevel::Info,
            "Stopped watching the scan; the server may still be running it",
        ));
        true
    }

    /// Manual retry after `Errored`, with the filters of the last start.
    pub async fn retry(&self) {
        if self.inner.phase() != ScanPhase::Errored {
            return;
        }
        let filters = self.inner.control.lock().filters.clone().unwrap_or_default();
        self.start(filters).await;
    }

    /// Return a finished session to `Idle`.
    pub fn acknowledge(&self) -> bool {
        self.inner.transition(ScanProgress::acknowledge) == Step::Applied
    }

    /// Detach. An active session is left `Cancelled`, without a notice; a
    /// finished one keeps its record. Runs on drop as well.
    pub fn teardown(&self) {
        let mut control = self.inner.control.lock();
        self.inner.transition(ScanProgress::cancel);
        Inner::release(&mut control);
    }

    pub fn progress(&self) -> ScanProgress {
        self.inner.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanProgress> {
        self.inner.progress.subscribe()
    }

    pub fn current_channel(&self) -> Option<ChannelHandle> {
        self.inner.control.lock().channel.clone()
    }

    /// Live-stream callback.
    pub fn on_event(&self, handle: &ChannelHandle, event: &ScanEvent) -> Step {
        self.inner.on_event(handle, event)
    }

    /// Polling callback.
    pub fn on_status(&self, handle: &ChannelHandle, status: &ScanStatus) -> Step {
        self.inner.on_status(handle, status)
    }

    /// Channel failure callback.
    pub fn on_error(&self, handle: &ChannelHandle, error: &TransportError) -> Step {
        self.inner.on_error(handle, error)
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
