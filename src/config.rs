use std::time::Duration;

use reqwest::Client;

use crate::error::Result;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Config {
    /// Covers TCP connect and the TLS handshake.
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Talk `http://` instead of `https://` to the registry.
    pub plain_http: bool,
    /// http, https or socks5 proxy URL, may carry `user:pass@`.
    pub proxy: Option<String>,
}

impl Config {
    pub fn scheme(&self) -> &'static str {
        if self.plain_http {
            "http"
        } else {
            "https"
        }
    }

    pub fn http_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);

        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(builder.build()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            plain_http: false,
            proxy: None,
        }
    }
}
