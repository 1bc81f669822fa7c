//! HTTP implementation of [`NodeApi`]

use async_trait::async_trait;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{ChainConfig, LimiterConfig, ObserverConfig, RemoteConfig, ServiceConfig};
use crate::endpoint::NodeEndpoint;
use crate::error::{Collection, FailureCause, Operation, RemoteError};
use crate::{NodeApi, NodeConnector};

const MAX_ERROR_BODY: usize = 512;

/// Client bound to one node's config API
pub struct NodeClient {
    http: reqwest::Client,
    base: String,
    auth: Option<(String, String)>,
}

impl NodeClient {
    /// Create a client with its own connection pool and per-request timeout
    pub fn new(endpoint: &NodeEndpoint, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_http(http, endpoint))
    }

    /// Create a client sharing an existing connection pool
    pub fn with_http(http: reqwest::Client, endpoint: &NodeEndpoint) -> Self {
        Self {
            http,
            base: endpoint.api_base(),
            auth: endpoint
                .basic_auth()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Result<Url, FailureCause> {
        let mut url = Url::parse(&self.base)
            .map_err(|e| FailureCause::Transport(format!("invalid node url {}: {}", self.base, e)))?;
        url.path_segments_mut()
            .map_err(|_| FailureCause::Transport(format!("invalid node url {}", self.base)))?
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self
            .http
            .request(method, url)
            .header(header::CONTENT_TYPE, "application/json");
        match &self.auth {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        operation: Operation,
        resource: &str,
    ) -> Result<Response, RemoteError> {
        request
            .send()
            .await
            .map_err(|e| RemoteError::new(operation, resource, FailureCause::Transport(e.to_string())))
    }

    async fn exists(&self, collection: Collection, name: &str) -> Result<bool, RemoteError> {
        let resource = label(collection, name);
        let url = self
            .url(&["config", collection.as_str(), name])
            .map_err(|cause| RemoteError::new(Operation::Lookup, &resource, cause))?;

        let response = self
            .send(self.request(Method::GET, url), Operation::Lookup, &resource)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let response = expect_status(response, &[StatusCode::OK], Operation::Lookup, &resource).await?;

        let body: serde_json::Value = response.json().await.map_err(|e| {
            RemoteError::new(Operation::Lookup, &resource, FailureCause::Decode(e.to_string()))
        })?;

        Ok(body.get("data").is_some_and(|data| !data.is_null()))
    }

    async fn create<T: Serialize + Sync>(
        &self,
        collection: Collection,
        name: &str,
        body: &T,
    ) -> Result<(), RemoteError> {
        if self.exists(collection, name).await? {
            debug!("{} {} already present on {}, skipping create", collection.kind(), name, self.base);
            return Ok(());
        }

        let resource = label(collection, name);
        let url = self
            .url(&["config", collection.as_str()])
            .map_err(|cause| RemoteError::new(Operation::Create, &resource, cause))?;

        let response = self
            .send(
                self.request(Method::POST, url).json(body),
                Operation::Create,
                &resource,
            )
            .await?;
        expect_status(
            response,
            &[StatusCode::OK, StatusCode::CREATED],
            Operation::Create,
            &resource,
        )
        .await?;

        debug!("Created {} {} on {}", collection.kind(), name, self.base);
        Ok(())
    }

    async fn delete(&self, collection: Collection, name: &str) -> Result<(), RemoteError> {
        if !self.exists(collection, name).await? {
            debug!("{} {} absent on {}, skipping delete", collection.kind(), name, self.base);
            return Ok(());
        }

        let resource = label(collection, name);
        let url = self
            .url(&["config", collection.as_str(), name])
            .map_err(|cause| RemoteError::new(Operation::Delete, &resource, cause))?;

        let response = self
            .send(self.request(Method::DELETE, url), Operation::Delete, &resource)
            .await?;
        expect_status(
            response,
            &[StatusCode::OK, StatusCode::NO_CONTENT],
            Operation::Delete,
            &resource,
        )
        .await?;

        debug!("Deleted {} {} on {}", collection.kind(), name, self.base);
        Ok(())
    }
}

#[async_trait]
impl NodeApi for NodeClient {
    async fn probe(&self) -> Result<(), RemoteError> {
        let url = self
            .url(&["config"])
            .map_err(|cause| RemoteError::new(Operation::Probe, "config", cause))?;
        let response = self
            .send(self.request(Method::GET, url), Operation::Probe, "config")
            .await?;
        expect_status(response, &[StatusCode::OK], Operation::Probe, "config").await?;
        Ok(())
    }

    async fn fetch_config(&self) -> Result<RemoteConfig, RemoteError> {
        let url = self
            .url(&["config"])
            .map_err(|cause| RemoteError::new(Operation::FetchConfig, "config", cause))?;
        let response = self
            .send(self.request(Method::GET, url), Operation::FetchConfig, "config")
            .await?;
        let response =
            expect_status(response, &[StatusCode::OK], Operation::FetchConfig, "config").await?;

        response.json::<RemoteConfig>().await.map_err(|e| {
            RemoteError::new(Operation::FetchConfig, "config", FailureCause::Decode(e.to_string()))
        })
    }

    async fn save_config(&self) -> Result<(), RemoteError> {
        let url = self
            .url(&["config"])
            .map_err(|cause| RemoteError::new(Operation::SaveConfig, "config", cause))?;
        let request = self.request(Method::POST, url).query(&[("format", "yaml")]);
        let response = self.send(request, Operation::SaveConfig, "config").await?;
        expect_status(response, &[StatusCode::OK], Operation::SaveConfig, "config").await?;
        Ok(())
    }

    async fn create_service(&self, service: &ServiceConfig) -> Result<(), RemoteError> {
        self.create(Collection::Services, &service.name, service).await
    }

    async fn delete_service(&self, name: &str) -> Result<(), RemoteError> {
        self.delete(Collection::Services, name).await
    }

    async fn create_chain(&self, chain: &ChainConfig) -> Result<(), RemoteError> {
        self.create(Collection::Chains, &chain.name, chain).await
    }

    async fn delete_chain(&self, name: &str) -> Result<(), RemoteError> {
        self.delete(Collection::Chains, name).await
    }

    async fn create_observer(&self, observer: &ObserverConfig) -> Result<(), RemoteError> {
        self.create(Collection::Observers, &observer.name, observer).await
    }

    async fn delete_observer(&self, name: &str) -> Result<(), RemoteError> {
        self.delete(Collection::Observers, name).await
    }

    async fn create_limiter(&self, limiter: &LimiterConfig) -> Result<(), RemoteError> {
        self.create(Collection::Limiters, &limiter.name, limiter).await
    }

    async fn delete_limiter(&self, name: &str) -> Result<(), RemoteError> {
        self.delete(Collection::Limiters, name).await
    }
}

/// Connector backed by a shared reqwest connection pool
#[derive(Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
}

impl HttpConnector {
    /// Every call issued through connected clients is bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

impl NodeConnector for HttpConnector {
    fn connect(&self, endpoint: &NodeEndpoint) -> Arc<dyn NodeApi> {
        Arc::new(NodeClient::with_http(self.http.clone(), endpoint))
    }
}

fn label(collection: Collection, name: &str) -> String {
    format!("{} {}", collection.kind(), name)
}

async fn expect_status(
    response: Response,
    accepted: &[StatusCode],
    operation: Operation,
    resource: &str,
) -> Result<Response, RemoteError> {
    let status = response.status();
    if accepted.contains(&status) {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    Err(RemoteError::new(
        operation,
        resource,
        FailureCause::Status {
            code: status.as_u16(),
            body,
        },
    ))
}
