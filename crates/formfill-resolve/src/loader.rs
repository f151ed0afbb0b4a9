//! Resource loader contract and per-pass cache
//!
//! Query expressions are urls resolved against an asynchronous loader.
//! The façade deduplicates urls across expressions and caches results
//! for the lifetime of one pass, so each round issues at most one
//! batched call and later rounds reuse earlier answers.

use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use formfill_model::Resource;

use crate::error::{Error, LoadError, Result};

/// Asynchronous provider of resources for query urls.
///
/// The loader may return fewer entries than urls requested; a missing
/// entry means an empty list. Results for the same url issued within
/// one pass must be stable.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn fetch(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> std::result::Result<HashMap<String, Vec<Resource>>, LoadError>;
}

/// A loader that serves a fixed url → resources map. Useful for tests
/// and for replaying captured fetches.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    entries: HashMap<String, Vec<Resource>>,
}

impl StaticLoader {
    pub fn new(entries: HashMap<String, Vec<Resource>>) -> Self {
        Self { entries }
    }

    pub fn with(mut self, url: impl Into<String>, resources: Vec<Resource>) -> Self {
        self.entries.insert(url.into(), resources);
        self
    }
}

#[async_trait]
impl ResourceLoader for StaticLoader {
    async fn fetch(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> std::result::Result<HashMap<String, Vec<Resource>>, LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        Ok(urls
            .iter()
            .filter_map(|url| self.entries.get(url).map(|r| (url.clone(), r.clone())))
            .collect())
    }
}

/// Per-pass url result cache in front of the loader.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: IndexMap<String, Vec<Resource>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    /// Cached results for a url; empty slice when nothing is cached.
    pub fn get(&self, url: &str) -> &[Resource] {
        self.entries.get(url).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fetches every url not yet cached in one batched loader call.
    ///
    /// Backend failures are downgraded to empty results for the
    /// requested urls; cancellation propagates.
    pub async fn fetch_missing(
        &mut self,
        loader: &dyn ResourceLoader,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut missing: Vec<String> = Vec::new();
        for url in urls {
            if !self.contains(url) && !missing.contains(url) {
                missing.push(url.clone());
            }
        }
        if missing.is_empty() {
            debug!("all urls cached, skipping fetch");
            return Ok(());
        }

        debug!(count = missing.len(), "fetching query urls");
        match loader.fetch(&missing, cancel).await {
            Ok(mut results) => {
                for url in missing {
                    let resources = results.remove(&url).unwrap_or_default();
                    self.entries.insert(url, resources);
                }
                Ok(())
            }
            Err(LoadError::Cancelled) => Err(Error::Cancelled),
            Err(LoadError::Backend(message)) => {
                warn!(%message, "loader failure, treating urls as empty");
                for url in missing {
                    self.entries.insert(url, Vec::new());
                }
                Ok(())
            }
        }
    }
}
