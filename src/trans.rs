use std::{fmt, sync::Arc};

use serde::Serialize;

use crate::{
    acc::AcmeKey,
    api,
    error::*,
    jws::{self, Jwk, JwsProtectedHeader},
    nonce::NoncePool,
    req::{handle_error, HttpClient, HttpRequest, HttpResponse},
};

/// JWS payload and nonce handling for requests to the API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `call_jwk()` against newAccount url
/// 3. `call_kid()` / `post_as_get()` with the key ID from the returned `Location` header.
#[derive(Clone)]
pub(crate) struct Transport {
    client: Arc<dyn HttpClient>,
    nonce_pool: Arc<NoncePool>,
}

impl Transport {
    pub fn new(client: Arc<dyn HttpClient>, nonce_pool: Arc<NoncePool>) -> Self {
        Transport { client, nonce_pool }
    }

    pub fn nonce_pool(&self) -> &NoncePool {
        &self.nonce_pool
    }

    /// Unsigned GET, only used for the directory.
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        log::debug!("Get endpoint: {url}");
        let res = self.client.send(HttpRequest::get(url)).await?;
        self.nonce_pool.replenish_from(&res);
        handle_error(res)
    }

    /// Make call using the full JWK.
    ///
    /// Only needed for newAccount requests.
    pub async fn call_jwk<T>(&self, url: &str, key: &AcmeKey, payload: &T) -> Result<HttpResponse>
    where
        T: Serialize + ?Sized,
    {
        let jwk = Jwk::try_from(key)?;

        self.do_call(url, None, key, Some(payload), |nonce| {
            JwsProtectedHeader::new_jwk(jwk.clone(), url, nonce)
        })
        .await
    }

    /// Make call using the key ID.
    pub async fn call_kid<T>(
        &self,
        url: &str,
        key: &AcmeKey,
        kid: &str,
        payload: &T,
    ) -> Result<HttpResponse>
    where
        T: Serialize + ?Sized,
    {
        self.do_call(url, None, key, Some(payload), |nonce| {
            JwsProtectedHeader::new_kid(key.algorithm(), kid, url, nonce)
        })
        .await
    }

    /// Fetch a resource with an empty signed payload ("POST-as-GET").
    pub async fn post_as_get(&self, url: &str, key: &AcmeKey, kid: &str) -> Result<HttpResponse> {
        self.post_as_get_accept(url, None, key, kid).await
    }

    pub async fn post_as_get_accept(
        &self,
        url: &str,
        accept: Option<&'static str>,
        key: &AcmeKey,
        kid: &str,
    ) -> Result<HttpResponse> {
        self.do_call::<api::EmptyObject, _>(url, accept, key, None, |nonce| {
            JwsProtectedHeader::new_kid(key.algorithm(), kid, url, nonce)
        })
        .await
    }

    async fn do_call<T, F>(
        &self,
        url: &str,
        accept: Option<&'static str>,
        key: &AcmeKey,
        payload: Option<&T>,
        make_header: F,
    ) -> Result<HttpResponse>
    where
        T: Serialize + ?Sized,
        F: Fn(String) -> JwsProtectedHeader,
    {
        // The ACME API may at any point invalidate all nonces. A rejected nonce is retried once
        // with a fresh one; a second rejection goes back to the caller.
        let mut retried = false;

        loop {
            // Either get a new nonce, or reuse one from a previous request.
            let nonce = self.nonce_pool.acquire(self.client.as_ref()).await?;

            // Sign the body. A nonce drawn here is spent even if signing fails.
            let jws = jws::sign(&make_header(nonce), key, payload)?;
            let body = serde_json::to_string(&jws)?;

            log::debug!("Call endpoint: {url}");

            let mut req = HttpRequest::post(url, body);
            req.accept = accept;

            let res = self.client.send(req).await?;

            // Regardless of the request being a success or not, there might be a nonce in the
            // response.
            self.nonce_pool.replenish_from(&res);

            match handle_error(res) {
                Err(Error::Ca { ref problem, .. }) if problem.is_bad_nonce() && !retried => {
                    log::debug!("Retrying on bad nonce");
                    retried = true;
                }
                result => return result,
            }
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
