//! A driver that serves fixture pages instead of the network.
//!
//! Implements the same `Driver` contract as the real drivers, including
//! bot-wall detection, so engine tests exercise the production worker
//! loop unchanged.

use async_trait::async_trait;
use quarry_driver::{
    botwall, Driver, DriverError, ElementSnapshot, PageLoadResult, WaitFor,
};
use quarry_engine::DriverFactory;
use quarry_protocol::types::SourceConfig;
use quarry_stealth::Session;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FixturePage {
    pub status: u16,
    pub body: String,
}

impl FixturePage {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Scripted site content, mutable mid-test (e.g. serve a challenge page
/// once and then recover, to simulate a transient bot wall).
#[derive(Default)]
pub struct FixtureSite {
    pages: Mutex<HashMap<String, Vec<FixturePage>>>,
    /// Bodies revealed step by step for infinite-scroll targets;
    /// frame 0 is what the entry URL serves before any scrolling.
    scroll_frames: Mutex<Vec<String>>,
}

impl FixtureSite {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, url: &str, page: FixturePage) {
        self.pages
            .lock()
            .expect("fixture pages lock")
            .insert(url.to_string(), vec![page]);
    }

    /// Serve responses in order; the final entry repeats forever.
    pub fn put_sequence(&self, url: &str, pages: Vec<FixturePage>) {
        self.pages
            .lock()
            .expect("fixture pages lock")
            .insert(url.to_string(), pages);
    }

    pub fn set_scroll_frames(&self, frames: Vec<String>) {
        *self.scroll_frames.lock().expect("scroll frames lock") = frames;
    }

    fn page(&self, url: &str) -> Option<FixturePage> {
        let mut pages = self.pages.lock().expect("fixture pages lock");
        let queue = pages.get_mut(url)?;
        if queue.len() > 1 {
            Some(queue.remove(0))
        } else {
            queue.first().cloned()
        }
    }

    fn frame(&self, step: usize) -> Option<String> {
        let frames = self.scroll_frames.lock().expect("scroll frames lock");
        frames.get(step.min(frames.len().saturating_sub(1))).cloned()
    }

    fn frame_count(&self) -> usize {
        self.scroll_frames.lock().expect("scroll frames lock").len()
    }
}

/// Invocation counters shared across every driver the factory hands out.
#[derive(Debug, Default)]
pub struct DriverCounters {
    pub goto_calls: AtomicU64,
    pub scroll_calls: AtomicU64,
    pub screenshot_calls: AtomicU64,
}

pub struct ScriptedDriver {
    site: Arc<FixtureSite>,
    counters: Arc<DriverCounters>,
    body: String,
    scroll_step: usize,
}

impl ScriptedDriver {
    fn snapshots(&self, selector: &Selector) -> Vec<ElementSnapshot> {
        let document = Html::parse_document(&self.body);
        document
            .select(selector)
            .map(|element| ElementSnapshot {
                text: element.text().collect::<Vec<_>>().join(" "),
                inner_html: element.inner_html(),
                attributes: element
                    .value()
                    .attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
            .collect()
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn goto(&mut self, url: &str, _wait_for: WaitFor) -> Result<PageLoadResult, DriverError> {
        self.counters.goto_calls.fetch_add(1, Ordering::SeqCst);
        let page = self.site.page(url).ok_or_else(|| DriverError::Transport {
            url: url.to_string(),
            message: "no fixture for url".to_string(),
        })?;

        self.body = page.body;
        self.scroll_step = 0;
        if self.site.frame_count() > 0 {
            if let Some(frame) = self.site.frame(0) {
                self.body = frame;
            }
        }

        let detected_block = botwall::detect(page.status, &self.body, url);
        Ok(PageLoadResult {
            ok: page.status < 400 && !detected_block,
            status: page.status,
            bytes: self.body.len() as u64,
            elapsed: Duration::from_millis(5),
            final_url: url.to_string(),
            detected_block,
        })
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementSnapshot>, DriverError> {
        let parsed =
            Selector::parse(selector).map_err(|_| DriverError::Selector(selector.to_string()))?;
        Ok(self.snapshots(&parsed))
    }

    async fn scroll_to_bottom(
        &mut self,
        max_steps: u32,
        _pause_between: Duration,
    ) -> Result<bool, DriverError> {
        self.counters.scroll_calls.fetch_add(1, Ordering::SeqCst);
        let frames = self.site.frame_count();
        if frames == 0 {
            return Ok(false);
        }
        let before = self.scroll_step;
        self.scroll_step = (before + max_steps as usize).min(frames - 1);
        if let Some(frame) = self.site.frame(self.scroll_step) {
            self.body = frame;
        }
        // True while scrolling still revealed a new frame, mirroring the
        // height-grew check in the real driver.
        Ok(self.scroll_step > before)
    }

    async fn execute_script(&mut self, _script: &str) -> Result<serde_json::Value, DriverError> {
        Ok(serde_json::Value::Null)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError> {
        self.counters.screenshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Factory handing out scripted drivers over one fixture site.
pub struct ScriptedDriverFactory {
    pub site: Arc<FixtureSite>,
    pub counters: Arc<DriverCounters>,
}

impl ScriptedDriverFactory {
    pub fn new(site: Arc<FixtureSite>) -> Arc<Self> {
        Arc::new(Self {
            site,
            counters: Arc::new(DriverCounters::default()),
        })
    }
}

#[async_trait]
impl DriverFactory for ScriptedDriverFactory {
    async fn create(
        &self,
        _session: &Session,
        _source: &SourceConfig,
    ) -> Result<Box<dyn Driver>, DriverError> {
        Ok(Box::new(ScriptedDriver {
            site: self.site.clone(),
            counters: self.counters.clone(),
            body: String::new(),
            scroll_step: 0,
        }))
    }
}
