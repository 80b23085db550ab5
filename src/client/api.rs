//! Endpoints and REST access for the three API views.

use std::ops::Deref;

use serde::de::DeserializeOwned;
use url::Url;

use crate::api::{ConfigList, LicenseStatus, StunnerConfig};
use crate::client::ClientError;
use crate::settings::{validate_keepalive, KeepaliveSettings};

const CONFIGS_PATH: &str = "/api/v1/configs";
const LICENSE_PATH: &str = "/api/v1/license";

/// Parse a server address, accepting a bare `host:port`.
pub(crate) fn base_url(addr: &str) -> Result<Url, ClientError> {
    let raw = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    };
    let url = Url::parse(&raw).map_err(|e| ClientError::InvalidAddress(addr.to_string(), e))?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => Err(ClientError::UnsupportedScheme(other.to_string())),
    }
}

fn with_scheme(url: &Url, scheme: &str) -> Url {
    // Url::set_scheme only fails across special/non-special schemes;
    // http(s) and ws(s) are all special.
    let mut out = url.clone();
    let _ = out.set_scheme(scheme);
    out
}

/// URLs for one view of the configs API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Plain GET endpoint.
    pub http: Url,
    /// Watch endpoint, `ws` or `wss`.
    pub ws: Url,
    /// Value of the `Origin` header sent on the upgrade.
    pub origin: String,
    /// Human-readable topic for logs and metrics.
    pub topic: String,
}

impl Endpoint {
    fn new(addr: &str, path: &str, node: Option<&str>, topic: String) -> Result<Self, ClientError> {
        let base = base_url(addr)?;
        let (http_scheme, ws_scheme) = match base.scheme() {
            "https" | "wss" => ("https", "wss"),
            _ => ("http", "ws"),
        };

        let mut http = with_scheme(&base, http_scheme);
        http.set_path(path);
        http.set_query(None);

        let mut ws = with_scheme(&http, ws_scheme);
        {
            let mut query = ws.query_pairs_mut();
            query.append_pair("watch", "true");
            if let Some(node) = node {
                query.append_pair("node", node);
            }
        }

        let origin = http.origin().ascii_serialization();
        Ok(Self {
            http,
            ws,
            origin,
            topic,
        })
    }
}

/// Shared client behind every view: REST snapshot plus the watch loop.
#[derive(Debug, Clone)]
pub struct ConfigClient {
    pub(crate) endpoint: Endpoint,
    pub(crate) keepalive: KeepaliveSettings,
    http: reqwest::Client,
}

impl ConfigClient {
    fn new(endpoint: Endpoint, keepalive: KeepaliveSettings) -> Result<Self, ClientError> {
        validate_keepalive(&keepalive).map_err(ClientError::Keepalive)?;
        Ok(Self {
            endpoint,
            keepalive,
            http: reqwest::Client::new(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// GET the view's REST endpoint and decode the body.
    pub(crate) async fn fetch<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        let body = self
            .http
            .get(self.endpoint.http.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body)
    }
}

/// Every config on the server.
#[derive(Debug, Clone)]
pub struct AllConfigsApi(ConfigClient);

impl AllConfigsApi {
    pub fn new(addr: &str, keepalive: KeepaliveSettings) -> Result<Self, ClientError> {
        let endpoint = Endpoint::new(addr, CONFIGS_PATH, None, "all".to_string())?;
        Ok(Self(ConfigClient::new(endpoint, keepalive)?))
    }

    /// Fetch every config once.
    pub async fn get(&self) -> Result<Vec<StunnerConfig>, ClientError> {
        Ok(self.fetch::<ConfigList>().await?.items)
    }
}

/// Configs of one namespace.
#[derive(Debug, Clone)]
pub struct ConfigsNamespaceApi(ConfigClient);

impl ConfigsNamespaceApi {
    pub fn new(addr: &str, namespace: &str, keepalive: KeepaliveSettings) -> Result<Self, ClientError> {
        let path = format!("{}/{}", CONFIGS_PATH, namespace);
        let endpoint = Endpoint::new(addr, &path, None, format!("{}/*", namespace))?;
        Ok(Self(ConfigClient::new(endpoint, keepalive)?))
    }

    /// Fetch the namespace's configs once.
    pub async fn get(&self) -> Result<Vec<StunnerConfig>, ClientError> {
        Ok(self.fetch::<ConfigList>().await?.items)
    }
}

/// A single config, optionally patched for the node the caller runs on.
#[derive(Debug, Clone)]
pub struct ConfigNamespaceNameApi(ConfigClient);

impl ConfigNamespaceNameApi {
    pub fn new(
        addr: &str,
        namespace: &str,
        name: &str,
        node: Option<&str>,
        keepalive: KeepaliveSettings,
    ) -> Result<Self, ClientError> {
        let path = format!("{}/{}/{}", CONFIGS_PATH, namespace, name);
        let node = node.filter(|n| !n.is_empty());
        let endpoint = Endpoint::new(addr, &path, node, format!("{}/{}", namespace, name))?;
        Ok(Self(ConfigClient::new(endpoint, keepalive)?))
    }

    /// Fetch the config once. A missing config is an HTTP 404 error.
    pub async fn get(&self) -> Result<StunnerConfig, ClientError> {
        self.fetch().await
    }
}

macro_rules! deref_client {
    ($($view:ty),*) => {
        $(
            impl $view {
                /// Unwrap the shared client, e.g. to hold any view as one type.
                pub fn into_inner(self) -> ConfigClient {
                    self.0
                }
            }

            impl Deref for $view {
                type Target = ConfigClient;

                fn deref(&self) -> &ConfigClient {
                    &self.0
                }
            }
        )*
    };
}

deref_client!(AllConfigsApi, ConfigsNamespaceApi, ConfigNamespaceNameApi);

/// Read-only access to the server's license status.
#[derive(Debug, Clone)]
pub struct LicenseApi {
    url: Url,
    http: reqwest::Client,
}

impl LicenseApi {
    pub fn new(addr: &str) -> Result<Self, ClientError> {
        let mut url = base_url(addr)?;
        if url.scheme() == "ws" || url.scheme() == "wss" {
            let scheme = if url.scheme() == "wss" { "https" } else { "http" };
            url = with_scheme(&url, scheme);
        }
        url.set_path(LICENSE_PATH);
        url.set_query(None);
        Ok(Self {
            url,
            http: reqwest::Client::new(),
        })
    }

    pub async fn get(&self) -> Result<LicenseStatus, ClientError> {
        let status = self
            .http
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(status)
    }
}
