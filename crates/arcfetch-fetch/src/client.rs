use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::{HeaderMap, Method, StatusCode, Version};
use url::Url;

use crate::config::declared_length;

/// A boxed stream type for HTTP response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// One outbound request, fully assembled by the transaction.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method:  Method,
    pub url:     Url,
    pub version: Version,
    pub headers: HeaderMap,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, version: Version::HTTP_11, headers: HeaderMap::new() }
    }

    /// Request line and headers as they go on the wire.
    pub fn envelope(&self) -> Vec<u8> {
        let mut target = self.url.path().to_string();
        if let Some(query) = self.url.query() {
            target.push('?');
            target.push_str(query);
        }
        let mut out = format!("{} {} {:?}\r\n", self.method, target, self.version).into_bytes();
        if !self.headers.contains_key(HOST)
            && let Some(host) = self.url.host_str()
        {
            let host = match self.url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            push_header(&mut out, HOST.as_str(), host.as_bytes());
        }
        for (name, value) in &self.headers {
            push_header(&mut out, name.as_str(), value.as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Response head plus a body stream that has not been read yet.
pub struct FetchResponse<E> {
    pub status:  StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body:    BoxStream<'static, Result<Bytes, E>>,
}

impl<E> FetchResponse<E> {
    /// Status line and headers, rebuilt from the parsed response.
    pub fn envelope(&self) -> Vec<u8> {
        let reason = self.status.canonical_reason().unwrap_or("");
        let mut out =
            format!("{:?} {} {}\r\n", self.version, self.status.as_u16(), reason).into_bytes();
        for (name, value) in &self.headers {
            push_header(&mut out, name.as_str(), value.as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    pub fn content_length(&self) -> Option<u64> { declared_length(&self.headers) }

    pub fn content_type(&self) -> Option<String> {
        self.headers.get(CONTENT_TYPE)?.to_str().ok().map(str::to_string)
    }
}

impl<E> std::fmt::Debug for FetchResponse<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

/// Asynchronous HTTP client abstraction.
///
/// Implementations send exactly the request given (no redirect following,
/// no transparent decompression) so the recorded bytes match what the
/// server sent. An `Err` from [`send`](HttpClient::send) is a connect
/// failure; an `Err` item from the body stream is a lost connection.
pub trait HttpClient: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn send(
        &self,
        request: FetchRequest,
    ) -> impl Future<Output = Result<FetchResponse<Self::Error>, Self::Error>> + Send;
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use futures_util::StreamExt;

    use super::*;
    use crate::config::{FetchConfig, SslTrustLevel};
    use crate::error::{FetchError, Result};

    /// Production client on top of `reqwest`.
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        pub fn new(config: &FetchConfig) -> Result<Self> {
            let mut builder = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .cookie_store(!config.ignore_cookies)
                .http1_only();

            if let Some(timeout) = config.socket_timeout() {
                builder = builder.connect_timeout(timeout).read_timeout(timeout);
            }

            builder = match config.ssl_trust_level {
                SslTrustLevel::Open | SslTrustLevel::Loose => builder.danger_accept_invalid_certs(true),
                SslTrustLevel::Normal => builder.danger_accept_invalid_hostnames(true),
                SslTrustLevel::Strict => builder,
            };

            if let Some(host) = &config.http_proxy_host {
                let port = config.http_proxy_port.unwrap_or(80);
                let mut proxy = reqwest::Proxy::all(format!("http://{host}:{port}"))
                    .map_err(|e| FetchError::Config(format!("proxy {host}:{port}: {e}")))?;
                if let Some(user) = &config.http_proxy_user {
                    proxy = proxy.basic_auth(user, config.http_proxy_password.as_deref().unwrap_or(""));
                }
                builder = builder.proxy(proxy);
            } else {
                builder = builder.no_proxy();
            }

            let client = builder.build().map_err(|e| FetchError::Config(e.to_string()))?;
            Ok(Self { client })
        }
    }

    impl HttpClient for ReqwestClient {
        type Error = reqwest::Error;

        async fn send(
            &self,
            request: FetchRequest,
        ) -> std::result::Result<FetchResponse<Self::Error>, Self::Error> {
            let response = self
                .client
                .request(request.method, request.url)
                .version(request.version)
                .headers(request.headers)
                .send()
                .await?;

            let status = response.status();
            let version = response.version();
            let headers = response.headers().clone();
            let body = response.bytes_stream().boxed();
            Ok(FetchResponse { status, version, headers, body })
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestClient;
