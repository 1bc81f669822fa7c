//! Addressing and credentials for a node's config API

use std::fmt;

/// Where a node's config API lives and how to authenticate against it
#[derive(Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl NodeEndpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    /// Whether the endpoint can be dialled at all
    ///
    /// Nodes with an empty address or port 0 are never contacted.
    pub fn is_dialable(&self) -> bool {
        !self.address.trim().is_empty() && self.port != 0
    }

    /// Base URL of the config API, e.g. `http://10.0.0.1:18080/api`
    pub fn api_base(&self) -> String {
        let host = self.address.trim();
        if host.contains(':') && !host.starts_with('[') {
            format!("http://[{}]:{}/api", host, self.port)
        } else {
            format!("http://{}:{}/api", host, self.port)
        }
    }

    /// Basic auth credentials, only when both halves are present
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

impl fmt::Debug for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeEndpoint")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}
