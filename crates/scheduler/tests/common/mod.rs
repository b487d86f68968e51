//! Scripted page decoder for driving the scheduler from tests.
//!
//! Pages can be gated (they report `is_decoding` until released) or made to
//! fail, and every interaction with the decoder is reported on an event
//! channel so tests can synchronise with the worker.

#![allow(dead_code)]

use docview_render::{
    DecodePriority, Document, OpenSource, Page, PageIndex, PageSize, PixelBuffer, PixelSource,
    SourceError, SourceResult,
};
use image::{Rgba, RgbaImage};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);
pub const NATIVE_SIZE: PageSize = PageSize { width: 1000, height: 1500 };

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Opened { page: PageIndex, priority: DecodePriority },
    Waiting { page: PageIndex },
    Rendered { page: PageIndex, width: u32, height: u32 },
}

#[derive(Default)]
struct ScriptState {
    gated: HashSet<PageIndex>,
    failing: HashSet<PageIndex>,
    renders: HashMap<PageIndex, usize>,
}

struct Shared {
    page_count: usize,
    state: Mutex<ScriptState>,
    progress: Condvar,
    events: flume::Sender<Event>,
}

/// Test-side control over the scripted decoder.
#[derive(Clone)]
pub struct Script {
    shared: Arc<Shared>,
}

impl Script {
    pub fn new(page_count: usize) -> (Self, flume::Receiver<Event>) {
        let (events, receiver) = flume::unbounded();
        let shared = Shared {
            page_count,
            state: Mutex::new(ScriptState::default()),
            progress: Condvar::new(),
            events,
        };
        (Self { shared: Arc::new(shared) }, receiver)
    }

    pub fn source(&self) -> ScriptedSource {
        ScriptedSource { script: self.clone() }
    }

    /// Keep `page` decoding until [`Script::release`] is called.
    pub fn gate(&self, page: PageIndex) {
        self.shared.state.lock().unwrap().gated.insert(page);
    }

    pub fn release(&self, page: PageIndex) {
        self.shared.state.lock().unwrap().gated.remove(&page);
        self.shared.progress.notify_all();
    }

    pub fn fail(&self, page: PageIndex) {
        self.shared.state.lock().unwrap().failing.insert(page);
    }

    pub fn recover(&self, page: PageIndex) {
        self.shared.state.lock().unwrap().failing.remove(&page);
    }

    pub fn render_count(&self, page: PageIndex) -> usize {
        self.shared.state.lock().unwrap().renders.get(&page).copied().unwrap_or(0)
    }

    fn emit(&self, event: Event) {
        let _ = self.shared.events.send(event);
    }
}

pub struct ScriptedSource {
    script: Script,
}

impl PixelSource for ScriptedSource {
    type Document = ScriptedDocument;

    fn open(&self, _source: &OpenSource) -> SourceResult<ScriptedDocument> {
        Ok(ScriptedDocument { script: self.script.clone() })
    }
}

pub struct ScriptedDocument {
    script: Script,
}

impl Document for ScriptedDocument {
    type Page = ScriptedPage;

    fn page_count(&self) -> usize {
        self.script.shared.page_count
    }

    fn page(&self, index: PageIndex, priority: DecodePriority) -> SourceResult<ScriptedPage> {
        self.script.emit(Event::Opened { page: index, priority });
        if index >= self.page_count() {
            return Err(SourceError::PageOutOfRange { page: index, page_count: self.page_count() });
        }
        Ok(ScriptedPage { index, script: self.script.clone() })
    }
}

pub struct ScriptedPage {
    index: PageIndex,
    script: Script,
}

impl Page for ScriptedPage {
    fn is_decoding(&self) -> bool {
        self.script.shared.state.lock().unwrap().gated.contains(&self.index)
    }

    fn wait_for_progress(&self, timeout: Duration) {
        self.script.emit(Event::Waiting { page: self.index });
        let state = self.script.shared.state.lock().unwrap();
        if state.gated.contains(&self.index) {
            let _ = self.script.shared.progress.wait_timeout(state, timeout).unwrap();
        }
    }

    fn size(&self) -> SourceResult<PageSize> {
        Ok(NATIVE_SIZE)
    }

    fn render_pixels(&self, width: u32, height: u32) -> SourceResult<PixelBuffer> {
        {
            let mut state = self.script.shared.state.lock().unwrap();
            if state.failing.contains(&self.index) {
                return Err(SourceError::Backend(format!("scripted failure on page {}", self.index)));
            }
            *state.renders.entry(self.index).or_insert(0) += 1;
        }

        self.script.emit(Event::Rendered { page: self.index, width, height });
        let shade = (self.index % 256) as u8;
        Ok(PixelBuffer::from(RgbaImage::from_pixel(width, height, Rgba([shade, 0, 0, 255]))))
    }
}

/// Wait for an event matching `wanted`, skipping everything else.
pub fn expect_event(events: &flume::Receiver<Event>, wanted: impl Fn(&Event) -> bool) -> Event {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) if wanted(&event) => return event,
            Ok(_) => continue,
            Err(e) => panic!("expected event did not arrive: {e}"),
        }
    }
}

/// Poll `condition` until it holds or the test deadline passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
