//! Provisioning certificates from ACME (Automatic Certificate Management Environment) providers
//! such as [Let's Encrypt](https://letsencrypt.org/).
//!
//! It follows the [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555) spec, using ACME v2 to
//! issue/renew certificates.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use acme::{
//!     create_p256_key,
//!     poll::PollPolicy,
//!     solver::{ChallengeContext, ChallengeSolver, SolverError},
//!     AcmeKey, Directory, DirectoryUrl,
//! };
//!
//! struct WebRoot;
//!
//! #[async_trait::async_trait]
//! impl ChallengeSolver for WebRoot {
//!     fn supported_types(&self) -> &[&str] {
//!         &["http-01"]
//!     }
//!
//!     async fn present(&self, ctx: &ChallengeContext) -> Result<(), SolverError> {
//!         let path = format!("/var/www{}", ctx.http_path());
//!         std::fs::write(path, ctx.key_authorization())?;
//!         Ok(())
//!     }
//! }
//!
//! async fn issue() -> acme::Result<()> {
//!     let dir = Directory::fetch(DirectoryUrl::LetsEncryptStaging).await?;
//!
//!     let key = Arc::new(AcmeKey::generate());
//!     let acc = dir
//!         .register_account(key, vec!["mailto:admin@example.com".to_owned()], true)
//!         .await?;
//!
//!     let mut order = acc.new_order("example.com", &["www.example.com"]).await?;
//!     // persist order.url() to resume with Account::order() after a restart
//!
//!     let policy = PollPolicy::default();
//!     order.authorize(Arc::new(WebRoot), &policy).await?;
//!     order.finalize_with_key(&create_p256_key(), &policy).await?;
//!
//!     let cert = order.download_certificate().await?;
//!     println!("{}", cert.certificate());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Domain Ownership
//!
//! Most website TLS certificates tries to prove ownership/control over the domain they are issued
//! for. For ACME, this means proving you control either:
//!
//! - a server answering TLS or HTTP requests for that domain;
//! - the DNS server answering name lookups against the domain.
//!
//! The library does not touch either. A [`ChallengeSolver`] puts the proof in place and the
//! workflow tells the CA to check it.
//!
//! ## Multiple Domains
//!
//! When creating a new order, it's possible to provide multiple alt-names that will also be part of
//! the certificate. The ACME API requires you to prove ownership of each such domain. These are
//! proven concurrently; the first failing one aborts the rest. See [`Order::authorize`].
//!
//! # Rate Limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API is not being abused. It
//! might be tempting to put the delays of [`PollPolicy`] really low, but balance this against the
//! real risk of having access cut off.
//!
//! ## Use Staging For Development!
//!
//! Especially take care to use the Let's Encrypt staging environment for development where the rate
//! limits are more relaxed. See [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [`ChallengeSolver`]: crate::solver::ChallengeSolver
//! [`Order::authorize`]: crate::order::Order::authorize()
//! [`PollPolicy`]: crate::poll::PollPolicy
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod acc;
mod cert;
mod dir;
mod error;
mod jws;
mod nonce;
mod trans;

pub mod api;
pub mod order;
pub mod poll;
pub mod req;
pub mod solver;

#[cfg(test)]
mod test;

pub use crate::{
    acc::{Account, AcmeKey, RevocationReason},
    cert::{create_p256_key, Certificate},
    dir::{Directory, DirectoryUrl},
    error::{BoxError, Error, Result},
};
