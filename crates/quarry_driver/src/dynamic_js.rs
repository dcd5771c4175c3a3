//! Dynamic-JS driver: full browser engine via the Chrome DevTools protocol.
//!
//! Handles lazy-loading, infinite scroll, and JavaScript-rendered answers.
//! Element queries are materialized in one script evaluation so the result
//! is an owned snapshot, same as the static driver.

use crate::{
    botwall, Driver, DriverError, ElementSnapshot, PageLoadResult, TimeoutKind, WaitFor,
};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use quarry_protocol::types::TimeoutBudget;
use quarry_stealth::Session;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct DynamicDriver {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    timeouts: TimeoutBudget,
}

#[derive(Debug, Deserialize)]
struct JsElement {
    #[serde(default)]
    text: String,
    #[serde(default)]
    html: String,
    #[serde(default)]
    attrs: HashMap<String, String>,
}

impl DynamicDriver {
    /// Launch a headless browser carrying the session's fingerprint.
    pub async fn start(session: &Session, timeouts: TimeoutBudget) -> Result<Self, DriverError> {
        let (width, height) = session.profile.viewport;
        let mut builder = BrowserConfig::builder().window_size(width, height);
        if let Some(proxy) = &session.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        let config = builder
            .build()
            .map_err(DriverError::Protocol)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;

        // The handler stream must be driven for the browser to make progress.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        page.set_user_agent(session.profile.user_agent)
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;

        Ok(Self {
            browser,
            page,
            handler_task,
            timeouts,
        })
    }

    async fn evaluate_value(
        &self,
        script: &str,
        kind: TimeoutKind,
        budget: Duration,
    ) -> Result<serde_json::Value, DriverError> {
        let evaluation = tokio::time::timeout(budget, self.page.evaluate(script))
            .await
            .map_err(|_| DriverError::Timeout { kind, budget })?
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        evaluation
            .into_value()
            .map_err(|e| DriverError::Protocol(format!("script result: {e}")))
    }

    async fn body_height(&self) -> Result<i64, DriverError> {
        let value = self
            .evaluate_value(
                "document.body ? document.body.scrollHeight : 0",
                TimeoutKind::ScriptExec,
                Duration::from_secs(self.timeouts.script_exec_secs),
            )
            .await?;
        Ok(value.as_i64().unwrap_or(0))
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), DriverError> {
        let budget = Duration::from_secs(self.timeouts.element_wait_secs);
        let deadline = Instant::now() + budget;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    kind: TimeoutKind::ElementWait,
                    budget,
                });
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

#[async_trait]
impl Driver for DynamicDriver {
    async fn goto(&mut self, url: &str, wait_for: WaitFor) -> Result<PageLoadResult, DriverError> {
        let budget = Duration::from_secs(self.timeouts.navigation_secs);
        let started = Instant::now();

        tokio::time::timeout(budget, async {
            self.page
                .goto(url)
                .await
                .map_err(|e| DriverError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| DriverError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
            Ok::<(), DriverError>(())
        })
        .await
        .map_err(|_| DriverError::Timeout {
            kind: TimeoutKind::Navigation,
            budget,
        })??;

        match &wait_for {
            WaitFor::Selector(selector) => self.wait_for_selector(selector).await?,
            WaitFor::Timeout(pause) => tokio::time::sleep(*pause).await,
            // wait_for_navigation above already waited for the network to
            // settle as far as the protocol reports it.
            WaitFor::NetworkIdle => {}
        }

        let final_url = self
            .page
            .url()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?
            .unwrap_or_else(|| url.to_string());
        let body = self
            .page
            .content()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        let elapsed = started.elapsed();

        // The CDP session does not surface the HTTP status for the main
        // document here; blocks are recognized from content and URL.
        let detected_block = botwall::detect(200, &body, &final_url);
        debug!(url = %final_url, bytes = body.len(), "page rendered");

        Ok(PageLoadResult {
            ok: !detected_block,
            status: if detected_block { 429 } else { 200 },
            bytes: body.len() as u64,
            elapsed,
            final_url,
            detected_block,
        })
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementSnapshot>, DriverError> {
        let quoted = serde_json::to_string(selector)
            .map_err(|_| DriverError::Selector(selector.to_string()))?;
        let script = format!(
            "Array.from(document.querySelectorAll({quoted})).map(el => ({{\
               text: el.innerText || el.textContent || '',\
               html: el.innerHTML,\
               attrs: Object.fromEntries(Array.from(el.attributes).map(a => [a.name, a.value]))\
             }}))"
        );
        let value = self
            .evaluate_value(
                &script,
                TimeoutKind::ScriptExec,
                Duration::from_secs(self.timeouts.script_exec_secs),
            )
            .await?;

        let elements: Vec<JsElement> = serde_json::from_value(value)
            .map_err(|e| DriverError::Protocol(format!("element snapshot: {e}")))?;
        Ok(elements
            .into_iter()
            .map(|el| ElementSnapshot {
                text: el.text,
                inner_html: el.html,
                attributes: el.attrs,
            })
            .collect())
    }

    async fn scroll_to_bottom(
        &mut self,
        max_steps: u32,
        pause_between: Duration,
    ) -> Result<bool, DriverError> {
        let mut last_height = self.body_height().await?;
        for step in 0..max_steps {
            self.evaluate_value(
                "window.scrollTo(0, document.body.scrollHeight)",
                TimeoutKind::ScriptExec,
                Duration::from_secs(self.timeouts.script_exec_secs),
            )
            .await?;
            tokio::time::sleep(pause_between).await;

            let height = self.body_height().await?;
            debug!(step, last_height, height, "scroll step");
            if height <= last_height {
                return Ok(false);
            }
            last_height = height;
        }
        Ok(true)
    }

    async fn execute_script(&mut self, script: &str) -> Result<serde_json::Value, DriverError> {
        self.evaluate_value(
            script,
            TimeoutKind::ScriptExec,
            Duration::from_secs(self.timeouts.script_exec_secs),
        )
        .await
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if let Err(e) = self.browser.close().await {
            warn!("browser close: {e}");
        }
        self.handler_task.abort();
        Ok(())
    }
}
