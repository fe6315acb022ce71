//! Transport adapter boundary.
//!
//! The protocol core only ever issues [`HttpRequest`]s and interprets [`HttpResponse`]s. How the
//! bytes travel (TLS, connection pooling, proxies) is the business of an [`HttpClient`]
//! implementation. [`ReqwestClient`] is the default one.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap};
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::{api::Problem, error::*};

const CONTENT_TYPE_JOSE: &str = "application/jose+json";
const CONTENT_TYPE_PROBLEM: &str = "application/problem+json";

pub(crate) const ACCEPT_PEM_CHAIN: &str = "application/pem-certificate-chain";

/// HTTP methods used by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

/// An abstract request issued by the protocol core.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,

    /// Flattened JWS JSON, for POST requests.
    pub body: Option<String>,

    /// Media type to negotiate, if not JSON.
    pub accept: Option<&'static str>,
}

impl HttpRequest {
    pub(crate) fn get(url: &str) -> Self {
        HttpRequest {
            method: Method::Get,
            url: url.to_owned(),
            body: None,
            accept: None,
        }
    }

    pub(crate) fn head(url: &str) -> Self {
        HttpRequest {
            method: Method::Head,
            ..Self::get(url)
        }
    }

    pub(crate) fn post(url: &str, body: String) -> Self {
        HttpRequest {
            method: Method::Post,
            body: Some(body),
            ..Self::get(url)
        }
    }
}

/// A response as seen by the protocol core.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub(crate) fn expect_header(&self, name: &str) -> Result<String> {
        self.header(name)
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::protocol(format!("missing header: {name}")))
    }

    /// Body as text. Invalid UTF-8 is replaced rather than failing.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub(crate) fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        log::trace!("{}", self.text());
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Parsed `Retry-After` header, either delta-seconds or an HTTP-date.
    pub fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(self.header("retry-after")?, OffsetDateTime::now_utc())
    }

    /// URLs of all `Link` headers with the given relation.
    pub fn links(&self, rel: &str) -> Vec<String> {
        self.headers
            .get_all(header::LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|link| parse_link(link, rel))
            .collect()
    }
}

/// Performs the HTTP calls on behalf of the protocol core.
///
/// Implementations must return every reply, including non-2xx ones, as `Ok`. Only failures to
/// obtain a reply at all are errors; use [`Error::Transport`] for those.
#[async_trait]
pub trait HttpClient: Send + Sync + fmt::Debug {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpClient`] over [`reqwest`].
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ReqwestClientBuilder {
        ReqwestClientBuilder::default()
    }
}

/// Configures a [`ReqwestClient`].
#[derive(Debug, Clone)]
pub struct ReqwestClientBuilder {
    connect_timeout: Duration,
    timeout: Duration,
    user_agent: String,
}

impl Default for ReqwestClientBuilder {
    fn default() -> Self {
        ReqwestClientBuilder {
            connect_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl ReqwestClientBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Timeout for a whole request, including reading the body.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<ReqwestClient> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .build()
            .map_err(Error::transport)?;

        Ok(ReqwestClient { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let method = match req.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &req.url);

        if let Some(accept) = req.accept {
            builder = builder.header(header::ACCEPT, accept);
        }

        if let Some(body) = req.body {
            builder = builder
                .header(header::CONTENT_TYPE, CONTENT_TYPE_JOSE)
                .body(body);
        }

        let res = builder.send().await.map_err(Error::transport)?;

        let status = res.status().as_u16();
        let headers = res.headers().clone();

        // letsencrypt sometimes closes the TLS abruptly causing io error
        // even though we did capture the body.
        let body = match res.bytes().await {
            Ok(body) => body.to_vec(),
            Err(err) => {
                log::debug!("Failed reading response body: {err}");
                Vec::new()
            }
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Turns non-2xx responses into errors.
///
/// Problem documents become [`Error::Ca`]. Other 5xx replies are [`Error::Transport`] and other
/// 4xx replies are [`Error::Protocol`].
pub(crate) fn handle_error(res: HttpResponse) -> Result<HttpResponse> {
    // ok responses pass through
    if res.is_success() {
        return Ok(res);
    }

    let is_problem = res
        .header("content-type")
        .is_some_and(|ct| ct.starts_with(CONTENT_TYPE_PROBLEM));

    if is_problem {
        match serde_json::from_slice::<Problem>(&res.body) {
            Ok(problem) => {
                return Err(Error::Ca {
                    status: res.status,
                    retry_after: res.retry_after(),
                    problem,
                })
            }
            Err(err) => {
                return Err(Error::protocol(format!(
                    "failed to deserialize {CONTENT_TYPE_PROBLEM} ({err}) body: {}",
                    res.text(),
                )))
            }
        }
    }

    let detail = format!("HTTP {} body: {}", res.status, res.text());

    if res.status >= 500 {
        Err(Error::transport(detail))
    } else {
        Err(Error::protocol(detail))
    }
}

fn parse_retry_after(value: &str, now: OffsetDateTime) -> Option<Duration> {
    let value = value.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let date = OffsetDateTime::parse(value, &Rfc2822).ok()?;
    let delta = date - now;

    // a date in the past means "now"
    Some(delta.try_into().unwrap_or(Duration::ZERO))
}

fn parse_link(link: &str, rel: &str) -> Option<String> {
    let mut parts = link.split(';');

    let url = parts
        .next()?
        .trim()
        .strip_prefix('<')?
        .strip_suffix('>')?;

    let has_rel = parts.any(|param| {
        let param = param.trim();
        param
            .strip_prefix("rel=")
            .map(|v| v.trim_matches('"'))
            .is_some_and(|v| v.split_whitespace().any(|r| r == rel))
    });

    has_rel.then(|| url.to_owned())
}
