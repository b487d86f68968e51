//! Decode scheduler
//!
//! Front door used by the viewer. Requests are registered per page, queued
//! for the single worker, and answered through a callback on the worker
//! thread. Marshalling the result onto a UI thread is the caller's business.

use crate::registry::{DecodeTaskRegistry, TaskId};
use crate::worker::{DecodeJob, DecodeWorker, WorkItem};
use docview_cache::RenderCache;
use docview_render::{
    scaled_width, Document, DocumentId, OpenSource, PageIndex, PixelSource, RgbaImage,
    SourceError,
};
use log::{debug, error, info};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: PageIndex, page_count: usize },
    #[error("invalid render request: width {target_width} at zoom {zoom}")]
    InvalidRequest { target_width: u32, zoom: f32 },
    #[error("scheduler has been shut down")]
    ShutDown,
    #[error("decode worker is no longer running")]
    WorkerGone,
    #[error("failed to open document: {0}")]
    Source(#[from] SourceError),
    #[error("failed to spawn decode worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A finished page handed to the request's callback.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page: PageIndex,
    pub task: TaskId,
    /// Pixel width of `image`
    pub width: u32,
    /// True when the image came from the render cache instead of the decoder
    pub from_cache: bool,
    pub image: Arc<RgbaImage>,
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Requests accepted by `decode_page`
    pub submitted: u64,
    /// Requests that replaced a live task for the same page
    pub superseded: u64,
    /// Live tasks removed by `stop_decoding` / `stop_all`
    pub stopped: u64,
    /// Queue slots dropped because their page was stopped before they ran
    pub skipped: u64,
    pub cache_hits: u64,
    /// Callbacks invoked
    pub delivered: u64,
    /// Tasks that started but lost liveness before delivery
    pub aborted: u64,
    /// Tasks that ended on a decoder error
    pub failed: u64,
}

/// Configuration for the decode worker.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long the worker waits on decode progress before re-checking
    /// liveness. Default: 200ms.
    pub poll_interval: Duration,

    /// Ask the decoder for the next page at low priority whenever a page is
    /// decoded. Default: on.
    pub read_ahead: bool,

    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            read_ahead: true,
            thread_name: "docview-decode".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_read_ahead(mut self, enabled: bool) -> Self {
        self.read_ahead = enabled;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Single-worker page decode scheduler for one open document.
///
/// At most one task is live per page. Requesting a page again supersedes the
/// earlier request, and a superseded or stopped task never reaches its
/// callback.
///
/// # Example
///
/// ```no_run
/// use docview_cache::RenderCache;
/// use docview_render::{ImageDirSource, OpenSource};
/// use docview_scheduler::{DecodeScheduler, SchedulerConfig};
/// use std::path::PathBuf;
/// use std::sync::Arc;
///
/// let cache = Arc::new(RenderCache::in_memory(64 * 1024 * 1024));
/// let source = OpenSource::Path(PathBuf::from("scans/"));
/// let mut scheduler =
///     DecodeScheduler::open(&ImageDirSource::new(), &source, cache, SchedulerConfig::default())?;
///
/// scheduler.decode_page(0, 800, 1.0, |rendered| {
///     println!("page {} is {}px wide", rendered.page, rendered.width);
/// })?;
///
/// // Page scrolled out of view before it was ready.
/// scheduler.stop_decoding(0)?;
///
/// scheduler.shutdown();
/// # Ok::<(), docview_scheduler::ScheduleError>(())
/// ```
pub struct DecodeScheduler {
    registry: Arc<DecodeTaskRegistry<DecodeJob>>,
    stats: Arc<Mutex<SchedulerStats>>,
    cache: Arc<RenderCache>,
    sender: Option<flume::Sender<WorkItem>>,
    worker: Option<JoinHandle<()>>,
    document_id: DocumentId,
    page_count: usize,
}

impl DecodeScheduler {
    /// Open `source` and start its decode worker.
    pub fn open<S: PixelSource>(
        pixel_source: &S,
        source: &OpenSource,
        cache: Arc<RenderCache>,
        config: SchedulerConfig,
    ) -> Result<Self, ScheduleError> {
        let document = pixel_source.open(source)?;
        Self::with_document(document, source.document_id(), cache, config)
    }

    /// Start a decode worker for an already opened document.
    pub fn with_document<D: Document>(
        document: D,
        document_id: DocumentId,
        cache: Arc<RenderCache>,
        config: SchedulerConfig,
    ) -> Result<Self, ScheduleError> {
        let page_count = document.page_count();
        let registry = Arc::new(DecodeTaskRegistry::new());
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));
        let (sender, receiver) = flume::unbounded();

        let worker = DecodeWorker {
            document,
            document_id: document_id.clone(),
            registry: Arc::clone(&registry),
            cache: Arc::clone(&cache),
            stats: Arc::clone(&stats),
            config: config.clone(),
        };
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker.run(receiver))?;

        info!("opened {document_id} ({page_count} pages)");
        Ok(Self {
            registry,
            stats,
            cache,
            sender: Some(sender),
            worker: Some(handle),
            document_id,
            page_count,
        })
    }

    fn check_page(&self, page: PageIndex) -> Result<(), ScheduleError> {
        if page >= self.page_count {
            return Err(ScheduleError::PageOutOfRange { page, page_count: self.page_count });
        }
        Ok(())
    }

    fn record(&self, update: impl FnOnce(&mut SchedulerStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Request `page` rendered `target_width` pixels wide at `zoom`.
    ///
    /// Supersedes any live request for the same page. `callback` runs on the
    /// worker thread, at most once, and only if this request is still the
    /// live one when the image is ready.
    pub fn decode_page<F>(
        &self,
        page: PageIndex,
        target_width: u32,
        zoom: f32,
        callback: F,
    ) -> Result<TaskId, ScheduleError>
    where
        F: FnOnce(RenderedPage) + Send + 'static,
    {
        self.check_page(page)?;
        let render_width = scaled_width(target_width, zoom)
            .ok_or(ScheduleError::InvalidRequest { target_width, zoom })?;
        let sender = self.sender.as_ref().ok_or(ScheduleError::ShutDown)?;

        let job = DecodeJob { target_width, zoom, render_width, callback: Box::new(callback) };
        let submission = self.registry.submit(page, job);
        self.record(|stats| {
            stats.submitted += 1;
            if submission.superseded.is_some() {
                stats.superseded += 1;
            }
        });

        let queued = match submission.ticket {
            Some(ticket) => sender.send(WorkItem::Decode { page, ticket }).is_ok(),
            // Reusing a queued slot only works while a worker is there to drain it.
            None => !sender.is_disconnected(),
        };
        if !queued {
            self.registry.remove(page);
            return Err(ScheduleError::WorkerGone);
        }

        debug!(
            "page {page}: task {} queued at {render_width}px (superseded: {:?})",
            submission.task, submission.superseded
        );
        Ok(submission.task)
    }

    /// Cancel the live request for `page`, if any.
    ///
    /// Returns `true` when a live task was cancelled. Stopping a page with
    /// nothing in flight is a no-op.
    pub fn stop_decoding(&self, page: PageIndex) -> Result<bool, ScheduleError> {
        self.check_page(page)?;

        match self.registry.remove(page) {
            Some(task) => {
                debug!("page {page}: task {task} stopped");
                self.record(|stats| stats.stopped += 1);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Cancel every live request. Returns how many were cancelled.
    pub fn stop_all(&self) -> usize {
        let stopped = self.registry.cancel_all();
        if stopped > 0 {
            debug!("stopped {stopped} live task(s)");
            self.record(|stats| stats.stopped += stopped as u64);
        }
        stopped
    }

    /// True while a request for `page` is queued or running.
    pub fn is_decoding(&self, page: PageIndex) -> bool {
        self.registry.contains(page)
    }

    pub fn live_tasks(&self) -> usize {
        self.registry.len()
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn cache(&self) -> &Arc<RenderCache> {
        &self.cache
    }

    pub fn stats(&self) -> SchedulerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel everything, stop the worker and wait for it to exit.
    ///
    /// Later requests fail with [`ScheduleError::ShutDown`]. Calling this more
    /// than once is harmless.
    pub fn shutdown(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };

        self.stop_all();
        // The worker also exits once the channel disconnects.
        let _ = sender.send(WorkItem::Shutdown);
        drop(sender);

        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!("decode worker for {} panicked", self.document_id);
            }
        }
        info!("closed {}", self.document_id);
    }
}

impl Drop for DecodeScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
