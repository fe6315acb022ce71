//! Challenge solving.
//!
//! The workflow does not know how to put a DNS record or an HTTP file in place. It hands the
//! details of the selected challenge to a [`ChallengeSolver`] and notifies the CA once the solver
//! returns.

use async_trait::async_trait;
use base64::prelude::*;
use sha2::{Digest as _, Sha256};

use crate::api;

/// Error returned by a [`ChallengeSolver`].
pub type SolverError = crate::error::BoxError;

/// Everything needed to provision a proof for one challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeContext {
    /// Challenge type, e.g. `http-01`.
    pub challenge_type: String,

    /// Challenge token.
    pub token: String,

    /// JWK thumbprint of the account key.
    pub account_key_thumbprint: String,

    /// Identifier being validated.
    pub identifier: api::Identifier,
}

impl ChallengeContext {
    /// Key authorization, `token || '.' || thumbprint`.
    ///
    /// This is the HTTP-01 file content.
    ///
    /// See [RFC 8555 §8.1](https://datatracker.ietf.org/doc/html/rfc8555#section-8.1).
    pub fn key_authorization(&self) -> String {
        format!("{}.{}", self.token, self.account_key_thumbprint)
    }

    /// DNS-01 TXT record value, the base64url SHA-256 of the key authorization.
    ///
    /// The record is placed at `_acme-challenge.<domain>`.
    pub fn dns_proof(&self) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(self.key_authorization()))
    }

    /// TLS-ALPN-01 digest to embed in the `acmeIdentifier` extension.
    ///
    /// See [RFC 8737 §3](https://datatracker.ietf.org/doc/html/rfc8737#section-3).
    pub fn tls_alpn_proof(&self) -> [u8; 32] {
        Sha256::digest(self.key_authorization()).into()
    }

    /// HTTP-01 path the CA will fetch, relative to the domain root.
    pub fn http_path(&self) -> String {
        format!("/.well-known/acme-challenge/{}", self.token)
    }
}

/// Provisions challenge proofs for the order workflow.
///
/// Called concurrently for different identifiers of the same order.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Challenge types this solver can provision, most preferred first.
    fn supported_types(&self) -> &[&str];

    /// Picks the challenge to attempt among those offered for an authorization.
    ///
    /// The default takes the first offered challenge whose type appears earliest in
    /// [`supported_types`](Self::supported_types).
    fn select<'a>(&self, auth: &'a api::Authorization) -> Option<&'a api::Challenge> {
        self.supported_types()
            .iter()
            .find_map(|ty| auth.challenge(ty))
    }

    /// Puts the proof in place. Returning means the CA may now validate.
    async fn present(&self, ctx: &ChallengeContext) -> Result<(), SolverError>;

    /// Removes the proof once validation is over, whatever its outcome.
    async fn cleanup(&self, _ctx: &ChallengeContext) -> Result<(), SolverError> {
        Ok(())
    }
}
