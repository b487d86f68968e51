//! The decode worker thread.
//!
//! One worker per open document. It owns the document, pulls page requests
//! off the queue in FIFO order and runs each one to delivery or abort. Between
//! every blocking step it asks the registry whether the task is still wanted.

use crate::registry::{DecodeTaskRegistry, QueueTicket, TaskHandle};
use crate::scheduler::{RenderedPage, SchedulerConfig, SchedulerStats};
use docview_cache::RenderCache;
use docview_render::{
    DecodePriority, Document, DocumentId, Page, PageIndex, RenderSize, SourceResult,
};
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

pub(crate) type DecodeCallback = Box<dyn FnOnce(RenderedPage) + Send + 'static>;

/// Work payload stored in the registry for each request.
pub(crate) struct DecodeJob {
    pub target_width: u32,
    pub zoom: f32,
    /// Target width scaled by zoom; also the width the cache is keyed on
    pub render_width: u32,
    pub callback: DecodeCallback,
}

pub(crate) enum WorkItem {
    Decode { page: PageIndex, ticket: QueueTicket },
    Shutdown,
}

enum Outcome {
    Delivered { from_cache: bool },
    Stale,
}

pub(crate) struct DecodeWorker<D: Document> {
    pub document: D,
    pub document_id: DocumentId,
    pub registry: Arc<DecodeTaskRegistry<DecodeJob>>,
    pub cache: Arc<RenderCache>,
    pub stats: Arc<Mutex<SchedulerStats>>,
    pub config: SchedulerConfig,
}

impl<D: Document> DecodeWorker<D> {
    /// Main worker loop. Returns when told to shut down or when every sender
    /// has been dropped.
    pub fn run(self, items: flume::Receiver<WorkItem>) {
        info!("decode worker started for {}", self.document_id);

        for item in items.iter() {
            match item {
                WorkItem::Decode { page, ticket } => self.execute(page, ticket),
                WorkItem::Shutdown => break,
            }
        }

        info!("decode worker stopped for {}", self.document_id);
    }

    fn record(&self, update: impl FnOnce(&mut SchedulerStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn execute(&self, page: PageIndex, ticket: QueueTicket) {
        let Some((handle, job)) = self.registry.begin(page, ticket) else {
            debug!("page {page}: request stopped while queued");
            self.record(|stats| stats.skipped += 1);
            return;
        };

        // A panic in the decoder or the callback must not take the worker down.
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.decode(&handle, job)));
        match result {
            Err(payload) => {
                error!("page {page}: task {} panicked: {}", handle.task(), panic_message(&*payload));
                self.record(|stats| stats.failed += 1);
            }
            Ok(Ok(Outcome::Delivered { from_cache })) => {
                debug!("page {page}: task {} delivered (cached: {from_cache})", handle.task());
                self.record(|stats| stats.delivered += 1);
            }
            Ok(Ok(Outcome::Stale)) => {
                debug!("page {page}: task {} no longer wanted", handle.task());
                self.record(|stats| stats.aborted += 1);
            }
            Ok(Err(e)) => {
                error!("page {page}: decode failed: {e}");
                self.record(|stats| stats.failed += 1);
            }
        }

        self.registry.finish(&handle);
    }

    fn decode(&self, handle: &TaskHandle, job: DecodeJob) -> SourceResult<Outcome> {
        let index = handle.page();
        let document = self.document_id.as_str();

        match self.cache.get(document, index, job.render_width) {
            Ok(Some(image)) => {
                self.record(|stats| stats.cache_hits += 1);
                return Ok(self.deliver(handle, job, image, true));
            }
            Ok(None) => {}
            Err(e) => warn!("page {index}: cache lookup failed, decoding instead: {e}"),
        }

        if !self.registry.is_live(handle) {
            return Ok(Outcome::Stale);
        }

        let page = self.document.page(index, DecodePriority::High)?;
        if self.config.read_ahead {
            self.read_ahead(index + 1);
        }

        while page.is_decoding() {
            if !self.registry.is_live(handle) {
                return Ok(Outcome::Stale);
            }
            page.wait_for_progress(self.config.poll_interval);
        }

        if !self.registry.is_live(handle) {
            return Ok(Outcome::Stale);
        }

        let size = RenderSize::for_page(page.size()?, job.target_width, job.zoom)?;
        let image = Arc::new(page.render_pixels(size.width, size.height)?.into_image());

        if !self.registry.is_live(handle) {
            return Ok(Outcome::Stale);
        }

        if let Err(e) = self.cache.put(document, index, job.render_width, Arc::clone(&image)) {
            warn!("page {index}: could not store render: {e}");
        }

        Ok(self.deliver(handle, job, image, false))
    }

    fn read_ahead(&self, next: PageIndex) {
        if next >= self.document.page_count() {
            return;
        }
        if let Err(e) = self.document.page(next, DecodePriority::Low) {
            debug!("read-ahead of page {next} ignored: {e}");
        }
    }

    fn deliver(
        &self,
        handle: &TaskHandle,
        job: DecodeJob,
        image: Arc<docview_render::RgbaImage>,
        from_cache: bool,
    ) -> Outcome {
        if !self.registry.complete(handle) {
            return Outcome::Stale;
        }

        let rendered = RenderedPage {
            page: handle.page(),
            task: handle.task(),
            width: image.width(),
            from_cache,
            image,
        };
        (job.callback)(rendered);
        Outcome::Delivered { from_cache }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
