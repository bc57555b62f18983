//! Envoy admin API client: fetches the config dump and clusters dump a
//! sidecar's admin port exposes, which `enrich` turns into a `ProxyConfig`.
//! Shaped after a typical internal HTTP client wrapper: an
//! `Arc<ClientInner>` handle cheap to clone per request, not a
//! connection-per-call.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

pub struct ClientInner {
    pub client: reqwest::Client,
    pub admin_port: u16,
}

#[derive(Clone)]
pub struct AdminHttpClient {
    inner: Arc<ClientInner>,
}

impl Deref for AdminHttpClient {
    type Target = ClientInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// The raw dumps an admin client retrieves for one pod. Both are kept
/// verbatim on `ProxyConfig.raw_*` regardless of how much `enrich`
/// manages to classify, since enrichment always fails soft.
pub struct AdminDumps {
    pub config_dump: Value,
    pub clusters_dump: Value,
}

#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn fetch(&self, pod_ip: &str) -> Result<AdminDumps>;
}

impl AdminHttpClient {
    pub fn new(admin_port: u16) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        Self { inner: Arc::new(ClientInner { client, admin_port }) }
    }
}

#[async_trait]
impl AdminClient for AdminHttpClient {
    async fn fetch(&self, pod_ip: &str) -> Result<AdminDumps> {
        let config_dump = self
            .client
            .get(format!("http://{pod_ip}:{}/config_dump", self.admin_port))
            .send()
            .await
            .context("failed to send config_dump request")?
            .error_for_status()
            .context("config_dump request returned error status")?
            .json::<Value>()
            .await
            .context("failed to parse config_dump as json")?;

        let clusters_dump = self
            .client
            .get(format!("http://{pod_ip}:{}/clusters?format=json", self.admin_port))
            .send()
            .await
            .context("failed to send clusters request")?
            .error_for_status()
            .context("clusters request returned error status")?
            .json::<Value>()
            .await
            .context("failed to parse clusters dump as json")?;

        Ok(AdminDumps { config_dump, clusters_dump })
    }
}
