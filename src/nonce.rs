use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::{
    error::*,
    req::{handle_error, HttpClient, HttpRequest, HttpResponse},
};

/// Upper bound of unused nonces kept around. Older ones are most likely stale.
const MAX_POOLED: usize = 10;

/// How many handed out nonces are remembered to refuse them if echoed again.
const MAX_ISSUED: usize = 64;

/// Shared pool of nonces.
///
/// Every nonce is handed out at most once. The lock is only ever held for queue operations, never
/// across a request.
#[derive(Default, Debug)]
pub(crate) struct NoncePool {
    nonce_url: Mutex<String>,
    state: Mutex<PoolState>,
}

#[derive(Default, Debug)]
struct PoolState {
    pooled: VecDeque<String>,
    issued: VecDeque<String>,
}

impl PoolState {
    fn issue(&mut self, nonce: &str) {
        self.issued.push_back(nonce.to_owned());

        if self.issued.len() > MAX_ISSUED {
            self.issued.pop_front();
        }
    }
}

impl NoncePool {
    pub fn new(nonce_url: &str) -> Self {
        NoncePool {
            nonce_url: Mutex::new(nonce_url.to_owned()),
            ..Default::default()
        }
    }

    /// Points the pool at a new newNonce endpoint, dropping nonces from the old one.
    pub fn set_nonce_url(&self, nonce_url: &str) {
        *self.nonce_url.lock() = nonce_url.to_owned();
        self.state.lock().pooled.clear();
    }

    /// Picks up the `Replay-Nonce` of any response, successful or not.
    pub fn replenish_from(&self, res: &HttpResponse) {
        if let Some(nonce) = res.header("replay-nonce") {
            self.replenish(nonce);
        }
    }

    pub fn replenish(&self, nonce: &str) {
        // see https://datatracker.ietf.org/doc/html/rfc8555#section-6.5.1
        if !is_valid_nonce(nonce) {
            log::debug!("Ignoring invalid replay-nonce: {nonce:?}");
            return;
        }

        log::trace!("Extracting new nonce");

        let mut state = self.state.lock();

        if state.pooled.iter().chain(&state.issued).any(|n| n == nonce) {
            log::debug!("Ignoring replay-nonce that was seen before");
            return;
        }

        state.pooled.push_back(nonce.to_owned());

        if state.pooled.len() > MAX_POOLED {
            state.pooled.pop_front();
        }
    }

    /// Takes a nonce out of the pool, or fetches a fresh one from the newNonce endpoint.
    ///
    /// A failure to fetch is fatal for the calling request.
    pub async fn acquire(&self, client: &dyn HttpClient) -> Result<String> {
        let pooled = {
            let mut state = self.state.lock();
            let nonce = state.pooled.pop_front();
            if let Some(nonce) = &nonce {
                state.issue(nonce);
            }
            nonce
        };

        if let Some(nonce) = pooled {
            log::trace!("Use previous nonce");
            return Ok(nonce);
        }

        let nonce_url = self.nonce_url.lock().clone();

        log::debug!("Request new nonce");
        let res = handle_error(client.send(HttpRequest::head(&nonce_url)).await?)?;

        let nonce = res.expect_header("replay-nonce")?;

        if !is_valid_nonce(&nonce) {
            return Err(Error::protocol(format!("invalid replay-nonce: {nonce:?}")));
        }

        self.state.lock().issue(&nonce);
        Ok(nonce)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().pooled.len()
    }
}

/// Nonces are non-empty base64url strings without padding.
fn is_valid_nonce(nonce: &str) -> bool {
    !nonce.is_empty()
        && nonce
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test::MockCa;

    #[test]
    fn rejects_malformed_nonces() {
        let pool = NoncePool::new("https://example.com/acme/new-nonce");
        pool.replenish("not valid!");
        pool.replenish("padded==");
        pool.replenish("");
        assert_eq!(pool.len(), 0);

        pool.replenish("8_uBBV3N2DBRJczhoiB46ugJKUkUHxGzVe6xIMpjHFM");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn pool_is_bounded_and_deduplicated() {
        let pool = NoncePool::new("https://example.com/acme/new-nonce");
        for i in 0..20 {
            pool.replenish(&format!("nonce{i}"));
            pool.replenish(&format!("nonce{i}"));
        }
        assert_eq!(pool.len(), MAX_POOLED);
    }

    #[tokio::test]
    async fn pooled_nonces_are_used_first_in_order() {
        let ca = MockCa::new(|_req| None);
        let pool = NoncePool::new(&ca.url("/acme/new-nonce"));
        pool.replenish("first");
        pool.replenish("second");

        assert_eq!(pool.acquire(&ca).await.unwrap(), "first");
        assert_eq!(pool.acquire(&ca).await.unwrap(), "second");
        assert_eq!(ca.count("/acme/new-nonce"), 0);

        // empty pool falls back to the endpoint
        let fetched = pool.acquire(&ca).await.unwrap();
        assert_ne!(fetched, "first");
        assert_eq!(ca.count("/acme/new-nonce"), 1);
    }

    #[tokio::test]
    async fn concurrent_acquire_never_hands_out_duplicates() {
        let ca = Arc::new(MockCa::new(|_req| None));
        let pool = Arc::new(NoncePool::new(&ca.url("/acme/new-nonce")));
        for i in 0..8 {
            pool.replenish(&format!("pooled{i}"));
        }

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let ca = Arc::clone(&ca);
            let pool = Arc::clone(&pool);
            tasks.spawn(async move { pool.acquire(ca.as_ref()).await.unwrap() });
        }

        let mut seen = std::collections::HashSet::new();
        while let Some(nonce) = tasks.join_next().await {
            assert!(seen.insert(nonce.unwrap()), "nonce handed out twice");
        }
        assert_eq!(seen.len(), 32);
    }

    #[tokio::test]
    async fn echoed_nonce_is_not_reused() {
        let ca = MockCa::new(|_req| None);
        let pool = NoncePool::new(&ca.url("/acme/new-nonce"));

        pool.replenish("once");
        assert_eq!(pool.acquire(&ca).await.unwrap(), "once");

        // a CA repeating a nonce that was already spent
        pool.replenish("once");
        assert_eq!(pool.len(), 0);

        let fetched = pool.acquire(&ca).await.unwrap();
        pool.replenish(&fetched);
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn failing_nonce_endpoint_is_fatal() {
        let ca = MockCa::new(|_req| Some(MockCa::plain(503, "unavailable")));
        let pool = NoncePool::new(&ca.url("/acme/new-nonce"));

        let err = pool.acquire(&ca).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
