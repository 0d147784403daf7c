//! Channel URL construction.
//!
//! The multiplexer only knows relative channel paths; turning them into an
//! absolute URL is delegated to a [`UrlBuilder`].

use url::Url;

use crate::error::{RealtimeLinkError, Result};

/// Turns a relative path into an absolute URL.
pub trait UrlBuilder: Send + Sync + 'static {
    fn build_url(&self, path: &str) -> Result<String>;
}

/// [`UrlBuilder`] backed by a fixed base URL (`http(s)://host[:port][/prefix]`).
#[derive(Debug, Clone)]
pub struct BaseUrl {
    base: Url,
}

impl BaseUrl {
    /// Parse and validate a base URL.
    ///
    /// The base must use `http`, `https`, `ws` or `wss`, include a host, and
    /// must not carry credentials, a query or a fragment.
    pub fn parse(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url.trim()).map_err(|e| {
            RealtimeLinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
        })?;

        match base.scheme() {
            "http" | "https" | "ws" | "wss" => {},
            other => {
                return Err(RealtimeLinkError::ConfigurationError(format!(
                    "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                    other
                )));
            },
        }

        if base.host_str().is_none() {
            return Err(RealtimeLinkError::ConfigurationError(
                "base_url must include a host".to_string(),
            ));
        }

        if !base.username().is_empty() || base.password().is_some() {
            return Err(RealtimeLinkError::ConfigurationError(
                "base_url must not include username/password credentials".to_string(),
            ));
        }

        if base.query().is_some() || base.fragment().is_some() {
            return Err(RealtimeLinkError::ConfigurationError(
                "base_url must not include query parameters or fragments".to_string(),
            ));
        }

        Ok(Self { base })
    }

    pub fn as_str(&self) -> &str {
        self.base.as_str()
    }
}

impl UrlBuilder for BaseUrl {
    fn build_url(&self, path: &str) -> Result<String> {
        let mut url = self.base.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        let suffix = path.trim_start_matches('/');
        url.set_path(&format!("{}/{}", prefix, suffix));
        Ok(url.to_string())
    }
}

/// Map an `http(s)` URL onto the matching `ws(s)` scheme.
pub(crate) fn to_ws_url(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url).map_err(|e| {
        RealtimeLinkError::ConfigurationError(format!("Invalid channel URL '{}': {}", url, e))
    })?;

    let ws_scheme = match parsed.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeLinkError::ConfigurationError(format!(
                "Unsupported channel URL scheme '{}'",
                other
            )));
        },
    };

    parsed.set_scheme(ws_scheme).map_err(|_| {
        RealtimeLinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;
    parsed.set_fragment(None);
    Ok(parsed.to_string())
}
