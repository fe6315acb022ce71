#![allow(clippy::trivial_regex)]

use std::{
    convert::Infallible,
    fmt,
    future::ready,
    net::TcpListener,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};

use actix_http::{HttpService, Request, Response, StatusCode};
use actix_server::{Server, ServerHandle};
use actix_web::body::MessageBody;
use async_trait::async_trait;
use base64::prelude::*;
use parking_lot::Mutex;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue};

use crate::{
    error::Result,
    req::{HttpClient, HttpRequest, HttpResponse, Method},
    Account, AcmeKey, Directory, DirectoryUrl,
};

static RE_URL: OnceLock<Regex> = OnceLock::new();

fn re_url() -> &'static Regex {
    RE_URL.get_or_init(|| Regex::new("<URL>").unwrap())
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct TestServer {
    pub dir_url: String,
    handle: ServerHandle,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        drop(self.handle.stop(false));
    }
}

fn get_directory(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "keyChange": "<URL>/acme/key-change",
    "newAccount": "<URL>/acme/new-acct",
    "newNonce": "<URL>/acme/new-nonce",
    "newOrder": "<URL>/acme/new-order",
    "revokeCert": "<URL>/acme/revoke-cert",
    "meta": {
        "caaIdentities": [
        "testdir.org"
        ]
    }
    }"#;

    Response::with_body(StatusCode::OK, re_url().replace_all(BODY, url).into_owned())
}

fn get_broken_directory() -> Response<impl MessageBody> {
    Response::with_body(StatusCode::INTERNAL_SERVER_ERROR, "oops")
}

fn head_new_nonce() -> Response<impl MessageBody> {
    Response::build(StatusCode::NO_CONTENT)
        .insert_header((
            "Replay-Nonce",
            "8_uBBV3N2DBRJczhoiB46ugJKUkUHxGzVe6xIMpjHFM",
        ))
        .finish()
}

fn post_new_acct(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "id": 7728515,
    "key": {
        "use": "sig",
        "kty": "EC",
        "crv": "P-256",
        "alg": "ES256",
        "x": "ttpobTRK2bw7ttGBESRO7Nb23mbIRfnRZwunL1W6wRI",
        "y": "h2Z00J37_2qRKH0-flrHEsH0xbit915Tyvd2v_CAOSk"
    },
    "contact": [
        "mailto:foo@bar.com"
    ],
    "initialIp": "90.171.37.12",
    "createdAt": "2018-12-31T17:15:40.399104457Z",
    "status": "valid"
    }"#;

    let location = re_url()
        .replace_all("<URL>/acme/acct/7728515", url)
        .into_owned();

    Response::build(StatusCode::CREATED)
        .insert_header(("Location", location))
        .body(BODY)
}

const ORDER_BODY: &str = r#"{
    "status": "<STATUS>",
    "expires": "2019-01-09T08:26:43.570360537Z",
    "identifiers": [
        {
        "type": "dns",
        "value": "acme-test.example.com"
        }
    ],
    "authorizations": [
        "<URL>/acme/authz/YTqpYUthlVfwBncUufE8IRWLMSRqcSs"
    ],
    "finalize": "<URL>/acme/finalize/7738992/18234324",
    "certificate": "<URL>/acme/cert/fae41c070f967713109028"
    }"#;

fn order_body(url: &str, status: &str) -> String {
    let body = re_url().replace_all(ORDER_BODY, url);
    body.replace("<STATUS>", status)
}

fn post_new_order(url: &str) -> Response<impl MessageBody> {
    let location = re_url()
        .replace_all("<URL>/acme/order/YTqpYUthlVfwBncUufE8", url)
        .into_owned();

    Response::build(StatusCode::CREATED)
        .insert_header(("Location", location))
        .body(order_body(url, "pending"))
}

fn post_get_order(url: &str) -> Response<impl MessageBody> {
    Response::build(StatusCode::OK).body(order_body(url, "valid"))
}

fn post_authz(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
        "identifier": {
            "type": "dns",
            "value": "acme-test.example.com"
        },
        "status": "pending",
        "expires": "2019-01-09T08:26:43Z",
        "challenges": [
        {
            "type": "http-01",
            "status": "pending",
            "url": "<URL>/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789597",
            "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
        },
        {
            "type": "tls-alpn-01",
            "status": "pending",
            "url": "<URL>/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789598",
            "token": "WCdRWkCy4THTD_j5IH4ISAzr59lFIg5wzYmKxuOJ1lU"
        },
        {
            "type": "dns-01",
            "status": "pending",
            "url": "<URL>/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789599",
            "token": "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8"
        }
        ]
    }"#;

    Response::build(StatusCode::OK).body(re_url().replace_all(BODY, url).into_owned())
}

fn post_finalize(url: &str) -> Response<impl MessageBody> {
    Response::build(StatusCode::OK).body(order_body(url, "processing"))
}

fn post_certificate(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = "-----BEGIN CERTIFICATE-----\nMIIBCERTHERE\n-----END CERTIFICATE-----\n";

    let alternate = re_url()
        .replace_all(r#"<<URL>/acme/cert/fae41c070f967713109028/1>;rel="alternate""#, url)
        .into_owned();

    Response::build(StatusCode::OK)
        .insert_header(("Content-Type", "application/pem-certificate-chain"))
        .insert_header(("Link", alternate))
        .body(BODY)
}

fn route_request(req: Request, url: &str) -> Response<impl MessageBody> {
    use actix_http::Method;

    match (req.method(), req.path()) {
        (&Method::GET, "/directory") => get_directory(url).map_into_boxed_body(),
        (&Method::GET, "/broken-directory") => get_broken_directory().map_into_boxed_body(),
        (&Method::HEAD, "/acme/new-nonce") => head_new_nonce().map_into_boxed_body(),
        (&Method::POST, "/acme/new-acct") => post_new_acct(url).map_into_boxed_body(),
        (&Method::POST, "/acme/new-order") => post_new_order(url).map_into_boxed_body(),

        (&Method::POST, "/acme/order/YTqpYUthlVfwBncUufE8") => {
            post_get_order(url).map_into_boxed_body()
        }

        (&Method::POST, "/acme/authz/YTqpYUthlVfwBncUufE8IRWLMSRqcSs") => {
            post_authz(url).map_into_boxed_body()
        }

        (&Method::POST, "/acme/finalize/7738992/18234324") => {
            post_finalize(url).map_into_boxed_body()
        }

        (&Method::POST, "/acme/cert/fae41c070f967713109028") => {
            post_certificate(url).map_into_boxed_body()
        }

        (_, _) => Response::build(StatusCode::NOT_FOUND)
            .finish()
            .map_into_boxed_body(),
    }
}

/// Serves a canned single-domain ACME flow over real HTTP.
pub fn with_directory_server() -> TestServer {
    init_logger();

    let lst = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = lst.local_addr().unwrap().port();

    let url = format!("http://127.0.0.1:{port}");
    let dir_url = format!("{url}/directory");

    let server = Server::build()
        .listen("acme", lst, move || {
            let url = url.clone();

            HttpService::build()
                .finish(move |req| ready(Ok::<_, Infallible>(route_request(req, &url))))
                .tcp()
        })
        .unwrap()
        .workers(1)
        .run();

    let handle = server.handle();

    tokio::spawn(server);

    TestServer { dir_url, handle }
}

#[tokio::test]
pub async fn test_make_directory() {
    let server = with_directory_server();
    let res = reqwest::get(&server.dir_url).await.unwrap();
    assert!(res.status().is_success());
}

const MOCK_BASE: &str = "https://ca.test";

/// A request as received by [`MockCa`], with the JWS envelope taken apart.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: Method,

    /// URL path, relative to the mock CA.
    pub path: String,

    pub accept: Option<&'static str>,

    /// `url` of the protected header.
    pub url: Option<String>,
    pub nonce: Option<String>,
    pub kid: Option<String>,
    pub jwk: Option<serde_json::Value>,

    /// Decoded payload. Empty for POST-as-GET and unsigned requests.
    pub payload: String,
}

impl MockRequest {
    pub fn payload_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload).unwrap()
    }
}

pub fn decode_b64_json(encoded: &str) -> serde_json::Value {
    serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(encoded).unwrap()).unwrap()
}

type Handler = Box<dyn Fn(&MockRequest) -> Option<HttpResponse> + Send + Sync>;

/// In-memory CA behind the [`HttpClient`] seam.
///
/// The handler answers the requests a test cares about; returning `None` falls back to a
/// directory, newNonce and newAccount that always succeed. Every response carries a fresh nonce
/// and every request is recorded.
pub struct MockCa {
    handler: Handler,
    requests: Mutex<Vec<MockRequest>>,
    nonces: AtomicUsize,
}

impl MockCa {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&MockRequest) -> Option<HttpResponse> + Send + Sync + 'static,
    {
        init_logger();

        MockCa {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            nonces: AtomicUsize::new(0),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{MOCK_BASE}{path}")
    }

    pub fn plain(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HeaderMap::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn json(status: u16, body: &str) -> HttpResponse {
        let mut res = Self::plain(status, body);
        res.headers.insert(
            "content-type",
            HeaderValue::from_static("application/json"),
        );
        res
    }

    /// Problem document of the given ACME error type, e.g. `badNonce`.
    pub fn problem(status: u16, kind: &str) -> HttpResponse {
        let body = serde_json::json!({
            "type": format!("urn:ietf:params:acme:error:{kind}"),
            "detail": format!("{kind} (mock)"),
            "status": status,
        });

        let mut res = Self::plain(status, &body.to_string());
        res.headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );
        res
    }

    /// 201 with a `Location` of the given path.
    pub fn created(location_path: &str, body: &str) -> HttpResponse {
        let mut res = Self::json(201, body);
        res.headers.insert(
            "location",
            HeaderValue::from_str(&format!("{MOCK_BASE}{location_path}")).unwrap(),
        );
        res
    }

    pub fn directory_body(new_order_path: &str, external_account_required: bool) -> String {
        serde_json::json!({
            "newNonce": format!("{MOCK_BASE}/acme/new-nonce"),
            "newAccount": format!("{MOCK_BASE}/acme/new-acct"),
            "newOrder": format!("{MOCK_BASE}{new_order_path}"),
            "revokeCert": format!("{MOCK_BASE}/acme/revoke-cert"),
            "keyChange": format!("{MOCK_BASE}/acme/key-change"),
            "meta": {
                "termsOfService": format!("{MOCK_BASE}/terms"),
                "externalAccountRequired": external_account_required,
            },
        })
        .to_string()
    }

    pub fn all_requests(&self) -> Vec<MockRequest> {
        self.requests.lock().clone()
    }

    pub fn requests(&self, path: &str) -> Vec<MockRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|req| req.path == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests(path).len()
    }

    /// Nonces of the signed requests sent to `path`, in order.
    pub fn nonces(&self, path: &str) -> Vec<String> {
        self.requests(path)
            .into_iter()
            .filter_map(|req| req.nonce)
            .collect()
    }

    fn fallback(&self, req: &MockRequest) -> HttpResponse {
        match (req.method, req.path.as_str()) {
            (Method::Get, "/directory") => {
                Self::json(200, &Self::directory_body("/acme/new-order", false))
            }
            (Method::Head, "/acme/new-nonce") => Self::plain(200, ""),
            (Method::Post, "/acme/new-acct") => {
                Self::created("/acme/acct/1", r#"{"status":"valid"}"#)
            }
            _ => Self::problem(404, "malformed"),
        }
    }

    fn next_nonce(&self) -> String {
        format!("mock-nonce-{}", self.nonces.fetch_add(1, Ordering::SeqCst))
    }
}

fn parse_request(req: &HttpRequest) -> MockRequest {
    let path = req
        .url
        .strip_prefix(MOCK_BASE)
        .unwrap_or(&req.url)
        .to_owned();

    let mut parsed = MockRequest {
        method: req.method,
        path,
        accept: req.accept,
        url: None,
        nonce: None,
        kid: None,
        jwk: None,
        payload: String::new(),
    };

    if let Some(body) = &req.body {
        let jws: serde_json::Value = serde_json::from_str(body).unwrap();
        let protected = decode_b64_json(jws["protected"].as_str().unwrap());

        let field = |name: &str| {
            protected
                .get(name)
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned)
        };
        parsed.url = field("url");
        parsed.nonce = field("nonce");
        parsed.kid = field("kid");
        parsed.jwk = protected.get("jwk").cloned();

        let payload = BASE64_URL_SAFE_NO_PAD
            .decode(jws["payload"].as_str().unwrap())
            .unwrap();
        parsed.payload = String::from_utf8(payload).unwrap();
    }

    parsed
}

impl fmt::Debug for MockCa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCa")
            .field("requests", &self.requests.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl HttpClient for MockCa {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let req = parse_request(&req);

        if let Some(url) = &req.url {
            assert_eq!(url, &self.url(&req.path), "protected header url must match target");
        }

        let mut res = (self.handler)(&req).unwrap_or_else(|| self.fallback(&req));

        if !res.headers.contains_key("replay-nonce") {
            res.headers.insert(
                "replay-nonce",
                HeaderValue::from_str(&self.next_nonce()).unwrap(),
            );
        }

        self.requests.lock().push(req);

        Ok(res)
    }
}

/// Directory and registered account on a [`MockCa`] driven by `handler`.
///
/// The account URL is `https://ca.test/acme/acct/1`.
pub async fn mock_session<F>(handler: F) -> (Arc<MockCa>, Account)
where
    F: Fn(&MockRequest) -> Option<HttpResponse> + Send + Sync + 'static,
{
    let ca = Arc::new(MockCa::new(handler));

    let dir = Directory::fetch_with_client(
        DirectoryUrl::Other(&ca.url("/directory")),
        Arc::clone(&ca) as Arc<dyn HttpClient>,
    )
    .await
    .unwrap();

    let acc = dir
        .register_account(Arc::new(AcmeKey::generate()), Vec::new(), true)
        .await
        .unwrap();

    (ca, acc)
}
