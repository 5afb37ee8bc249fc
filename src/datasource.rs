//! Fetch-and-memoize wrapper around the agent's source document.
//!
//! The document is downloaded on first use and cached until `/refresh`
//! invalidates it; the next access re-fetches. A single-flight lock keeps
//! concurrent first loads from racing duplicate downloads.

use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwapOption;
use reqwest::Client;
use tokio::sync::Mutex;

pub struct DataSource {
    url: Option<String>,
    client: Client,
    cached: ArcSwapOption<String>,
    load_lock: Mutex<()>,
}

impl DataSource {
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            cached: ArcSwapOption::const_empty(),
            load_lock: Mutex::new(()),
        }
    }

    /// System context handed to the agent, built from the memoized document
    /// when one is configured.
    pub async fn system_context(&self) -> anyhow::Result<String> {
        match self.document().await? {
            Some(doc) => Ok(format!(
                "You answer questions using this source document:\n{doc}"
            )),
            None => Ok("You are a helpful assistant replying over chat.".to_owned()),
        }
    }

    /// Drop the cached document so the next access re-fetches.
    pub fn invalidate(&self) {
        self.cached.store(None);
        tracing::info!("source document cache invalidated");
    }

    pub fn is_cached(&self) -> bool {
        self.cached.load().is_some()
    }

    async fn document(&self) -> anyhow::Result<Option<Arc<String>>> {
        let Some(ref url) = self.url else {
            return Ok(None);
        };

        if let Some(doc) = self.cached.load_full() {
            return Ok(Some(doc));
        }

        let _guard = self.load_lock.lock().await;
        // Another task may have finished the load while we waited.
        if let Some(doc) = self.cached.load_full() {
            return Ok(Some(doc));
        }

        tracing::info!("fetching source document");
        let text = self
            .client
            .get(url)
            .send()
            .await
            .context("source document request failed")?
            .error_for_status()
            .context("source document request rejected")?
            .text()
            .await
            .context("source document body read failed")?;
        tracing::info!(bytes = text.len(), "source document cached");

        let doc = Arc::new(text);
        self.cached.store(Some(Arc::clone(&doc)));
        Ok(Some(doc))
    }

    #[cfg(test)]
    fn seed(&self, document: &str) {
        self.cached.store(Some(Arc::new(document.to_owned())));
    }
}
