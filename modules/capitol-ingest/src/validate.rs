//! Cheap reachability probing before committing download bandwidth.

use capitol_common::Config;
use futures::stream::{self, StreamExt};
use reqwest::header::RANGE;
use tracing::{debug, info};

use crate::error::Result;
use crate::http::build_client;

pub struct Validator {
    client: reqwest::Client,
    concurrency: usize,
}

impl Validator {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_client(build_client(config)?, config.concurrency))
    }

    pub(crate) fn with_client(client: reqwest::Client, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// HEAD the URL; if the server refuses HEAD or answers with an error,
    /// try a one-byte ranged GET before giving up. Network errors mean
    /// unreachable, never a hard failure.
    pub async fn is_reachable(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => return true,
            Ok(resp) => {
                debug!(url, status = resp.status().as_u16(), "HEAD rejected, probing with GET");
            }
            Err(e) => {
                debug!(url, error = %e, "HEAD failed, probing with GET");
            }
        }

        match self.client.get(url).header(RANGE, "bytes=0-0").send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "Unreachable");
                false
            }
        }
    }

    /// The reachable subset of `urls`, in input order.
    pub async fn filter(&self, urls: &[String]) -> Vec<String> {
        let checked: Vec<(String, bool)> = stream::iter(urls.iter().cloned())
            .map(|url| async move {
                let ok = self.is_reachable(&url).await;
                (url, ok)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let reachable: Vec<String> = checked.into_iter().filter(|(_, ok)| *ok).map(|(u, _)| u).collect();
        info!(
            candidates = urls.len(),
            reachable = reachable.len(),
            "Reachability check complete"
        );
        reachable
    }
}
