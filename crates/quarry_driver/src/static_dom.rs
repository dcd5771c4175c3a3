//! Static-DOM driver: synchronous page fetch, no JavaScript.
//!
//! The fetched body is kept as a plain string and re-parsed per query so
//! no parsed-DOM handle (which is not `Send`) ever crosses an await point.

use crate::{
    botwall, Driver, DriverError, ElementSnapshot, PageLoadResult, TimeoutKind, WaitFor,
};
use async_trait::async_trait;
use quarry_protocol::types::TimeoutBudget;
use quarry_stealth::Session;
use scraper::{Html, Selector};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

pub struct StaticDriver {
    client: reqwest::Client,
    timeouts: TimeoutBudget,
    body: String,
    current_url: String,
}

impl StaticDriver {
    /// Build a client carrying the session's fingerprint and proxy.
    pub fn start(session: &Session, timeouts: TimeoutBudget) -> Result<Self, DriverError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(session.profile.user_agent)
            .timeout(Duration::from_secs(timeouts.navigation_secs))
            .cookie_store(true);

        if let Some(proxy) = &session.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| DriverError::Transport {
                url: proxy.clone(),
                message: format!("invalid proxy: {e}"),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| DriverError::Protocol(e.to_string()))?;
        Ok(Self {
            client,
            timeouts,
            body: String::new(),
            current_url: String::new(),
        })
    }

    fn parse_selector(selector: &str) -> Result<Selector, DriverError> {
        Selector::parse(selector).map_err(|_| DriverError::Selector(selector.to_string()))
    }

    /// Synchronous DOM scan; the parsed document never escapes this frame.
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
impl Driver for StaticDriver {
    async fn goto(&mut self, url: &str, wait_for: WaitFor) -> Result<PageLoadResult, DriverError> {
        Url::parse(url).map_err(|e| DriverError::Transport {
            url: url.to_string(),
            message: format!("invalid url: {e}"),
        })?;

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DriverError::Timeout {
                        kind: TimeoutKind::Navigation,
                        budget: Duration::from_secs(self.timeouts.navigation_secs),
                    }
                } else {
                    DriverError::Transport {
                        url: url.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| DriverError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let elapsed = started.elapsed();

        let detected_block = botwall::detect(status, &body, &final_url);
        self.body = body;
        self.current_url = final_url.clone();

        if let WaitFor::Selector(selector) = &wait_for {
            let parsed = Self::parse_selector(selector)?;
            if self.snapshots(&parsed).is_empty() && !detected_block {
                return Err(DriverError::Timeout {
                    kind: TimeoutKind::ElementWait,
                    budget: Duration::from_secs(self.timeouts.element_wait_secs),
                });
            }
        }

        debug!(url = %final_url, status, bytes = self.body.len(), "page fetched");
        Ok(PageLoadResult {
            ok: status < 400 && !detected_block,
            status,
            bytes: self.body.len() as u64,
            elapsed,
            final_url,
            detected_block,
        })
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementSnapshot>, DriverError> {
        let parsed = Self::parse_selector(selector)?;
        Ok(self.snapshots(&parsed))
    }

    async fn scroll_to_bottom(
        &mut self,
        _max_steps: u32,
        _pause_between: Duration,
    ) -> Result<bool, DriverError> {
        Err(DriverError::Unsupported("scroll_to_bottom"))
    }

    async fn execute_script(&mut self, _script: &str) -> Result<serde_json::Value, DriverError> {
        Err(DriverError::Unsupported("execute_script"))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError> {
        Err(DriverError::Unsupported("screenshot"))
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.body.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_protocol::types::SourceId;
    use quarry_stealth::{BehavioralProfile, BROWSER_PROFILES};
    use uuid::Uuid;

    fn test_session() -> Session {
        Session {
            session_id: Uuid::new_v4(),
            source_id: SourceId::new("quizpages"),
            profile: BROWSER_PROFILES[0],
            behavioral: BehavioralProfile::new(1, 2),
            proxy: None,
        }
    }

    fn driver_with_body(body: &str) -> StaticDriver {
        let mut driver =
            StaticDriver::start(&test_session(), TimeoutBudget::default()).unwrap();
        driver.body = body.to_string();
        driver
    }

    #[tokio::test]
    async fn query_all_materializes_snapshots() {
        let mut driver = driver_with_body(
            r#"<div class="q"><p>First?</p></div><div class="q" data-id="7"><p>Second?</p></div>"#,
        );
        let found = driver.query_all("div.q").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].text.contains("First?"));
        assert_eq!(found[1].attributes.get("data-id").unwrap(), "7");
    }

    #[tokio::test]
    async fn invalid_selector_is_reported() {
        let mut driver = driver_with_body("<p>x</p>");
        assert!(matches!(
            driver.query_all(":::nope").await,
            Err(DriverError::Selector(_))
        ));
    }

    #[tokio::test]
    async fn dynamic_operations_are_unsupported() {
        let mut driver = driver_with_body("");
        assert!(matches!(
            driver
                .scroll_to_bottom(3, Duration::from_millis(10))
                .await,
            Err(DriverError::Unsupported(_))
        ));
        assert!(matches!(
            driver.execute_script("1 + 1").await,
            Err(DriverError::Unsupported(_))
        ));
    }
}
