//! Order life cycle.
//!
//! An order goes through a life cycle of states driven by the CA. The [`Order`] handle offers the
//! actions for each stage and polls the CA in between:
//!
//! 1. Prove ownership of every identifier:
//!    * [`Order::authorize`] with a [`ChallengeSolver`], or by hand via
//!      [`Order::authorizations`] -> [`Auth`] -> [`Challenge`].
//! 2. Submit a CSR and download the certificate:
//!    * [`Order::finalize`] / [`Order::finalize_with_key`] -> [`Order::download_certificate`].
//!
//! The order URL can be persisted and handed to [`Account::order`] to pick up an order after a
//! restart.
//!
//! [`Account::order`]: crate::Account::order()

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinSet, time::Instant};

use crate::{
    acc::AccountInner,
    api,
    cert::{create_csr, csr_identifiers, Certificate},
    error::*,
    poll::{poll_until, Poll, PollPolicy},
    req::ACCEPT_PEM_CHAIN,
    solver::ChallengeSolver,
};

mod auth;

use self::auth::Outstanding;
pub use self::auth::{Auth, Challenge};

/// A certificate order created by [`Account::new_order`].
///
/// An order is created using one or many identifiers. All of them must have authorizations
/// ([confirmed ownership]) before the order can progress to submitting a [CSR].
///
/// The ACME API provider might "remember" for a time that you already own a domain, which
/// means you might not need to prove the ownership every time.
///
/// [`Account::new_order`]: crate::Account::new_order()
/// [confirmed ownership]: crate#domain-ownership
/// [CSR]: https://en.wikipedia.org/wiki/Certificate_signing_request
#[derive(Debug, Clone)]
pub struct Order {
    inner: Arc<AccountInner>,
    pub(crate) api_order: api::Order,
    url: String,
}

impl Order {
    pub(crate) fn new(inner: &Arc<AccountInner>, api_order: api::Order, url: String) -> Self {
        Order {
            inner: Arc::clone(inner),
            api_order,
            url,
        }
    }

    /// The order URL. Persist it to resume the order later.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Last observed order status.
    pub fn status(&self) -> Option<api::OrderStatus> {
        self.api_order.status()
    }

    /// Access the underlying JSON object.
    pub fn api_order(&self) -> &api::Order {
        &self.api_order
    }

    /// Tell if the identifiers in this order have been authorized.
    ///
    /// This doesn't do any calls against the API. You must manually call [`refresh`].
    ///
    /// [`refresh`]: Self::refresh()
    pub fn is_validated(&self) -> bool {
        matches!(
            self.api_order.status(),
            Some(api::OrderStatus::Ready | api::OrderStatus::Processing | api::OrderStatus::Valid)
        )
    }

    /// Refresh the order state against the ACME API.
    ///
    /// This is a "POST-as-GET" against the order URL.
    pub async fn refresh(&mut self) -> Result<&api::Order> {
        let (api_order, _) = fetch_order(&self.inner, &self.url).await?;
        self.api_order.overwrite(api_order)?;
        Ok(&self.api_order)
    }

    /// Fetches the authorizations of this order, one per identifier.
    ///
    /// If the order includes identifiers that have been authorized before, this list might contain
    /// a mix of already valid and not yet valid auths.
    pub async fn authorizations(&self) -> Result<Vec<Auth>> {
        let mut result = vec![];

        if let Some(authorizations) = &self.api_order.authorizations {
            for auth_url in authorizations {
                let res = self.inner.post_as_get(auth_url).await?;
                let api_auth = res.json::<api::Authorization>()?;
                result.push(Auth::new(&self.inner, api_auth, auth_url));
            }
        }

        Ok(result)
    }

    /// Proves ownership of every identifier of the order, then waits for the order to be `ready`.
    ///
    /// Pending authorizations are resolved concurrently through `solver`. The first authorization
    /// found invalid fails the whole call, naming its identifier, and stops the other ones
    /// in flight. Proofs the stopped ones had provisioned are cleaned up before returning. All
    /// polling shares a single deadline taken from `policy`.
    pub async fn authorize(
        &mut self,
        solver: Arc<dyn ChallengeSolver>,
        policy: &PollPolicy,
    ) -> Result<()> {
        let deadline = policy.deadline();
        let outstanding = Arc::new(Outstanding::default());

        let mut tasks = JoinSet::new();

        for auth in self.authorizations().await? {
            match auth.status() {
                api::AuthorizationStatus::Valid => {
                    log::debug!("Authorization for {} already valid", auth.display_identifier());
                }

                api::AuthorizationStatus::Pending => {
                    let solver = Arc::clone(&solver);
                    let outstanding = Arc::clone(&outstanding);
                    let policy = policy.clone();

                    tasks.spawn(async move {
                        auth.resolve(solver.as_ref(), &outstanding, &policy, deadline)
                            .await
                    });
                }

                _ => return Err(auth.invalid_error()),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => Err(Error::transport(err)),
            };

            if let Err(err) = outcome {
                log::debug!("Aborting {} remaining authorization(s): {err}", tasks.len());
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}

                // proofs of aborted attempts are still in place
                let leftover = std::mem::take(&mut *outstanding.lock());
                for ctx in &leftover {
                    auth::cleanup(solver.as_ref(), ctx).await;
                }

                return Err(err);
            }
        }

        let inner = &self.inner;
        let url = self.url.as_str();

        let api_order = poll_until(policy, deadline, "order", url, move || async move {
            let (api_order, retry_after) = fetch_order(inner, url).await?;

            match api_order.status() {
                Some(api::OrderStatus::Invalid) => Err(order_invalid(url, api_order)),
                Some(api::OrderStatus::Pending) | None => Ok(Poll::Pending(retry_after)),
                Some(_) => Ok(Poll::Done(api_order)),
            }
        })
        .await?;

        self.api_order.overwrite(api_order)?;

        log::debug!("Order {} is {:?}", self.url, self.api_order.status());
        Ok(())
    }

    /// Finalizes the order with a DER encoded CSR and waits until the certificate is issued.
    ///
    /// The identifiers requested by the CSR (subject CN and SANs) must be exactly the identifiers
    /// of the order, compared case-insensitively and in any order. A mismatch fails before
    /// anything is sent to the CA.
    ///
    /// Once the CSR has been submitted, the order goes into a `processing` status, where we must
    /// poll until the status changes.
    pub async fn finalize(&mut self, csr_der: &[u8], policy: &PollPolicy) -> Result<()> {
        let requested = csr_identifiers(csr_der)?;

        if !api::same_identifiers(&requested, &self.api_order.identifiers) {
            return Err(Error::local(format!(
                "CSR identifiers {:?} do not match order identifiers {:?}",
                requested.iter().map(|id| &id.value).collect::<Vec<_>>(),
                self.api_order.domains(),
            )));
        }

        let deadline = policy.deadline();
        let mut retry_after = None;

        match self.api_order.status() {
            Some(api::OrderStatus::Ready) => {
                let res = self
                    .inner
                    .call(&self.api_order.finalize, &api::Finalize::new(csr_der))
                    .await?;

                retry_after = res.retry_after();
                let api_order = res.json::<api::Order>()?;
                self.api_order.overwrite(api_order)?;

                log::debug!("Submitted CSR for order {}", self.url);

                if self.api_order.is_status_invalid() {
                    return Err(order_invalid(&self.url, self.api_order.clone()));
                }
            }

            Some(api::OrderStatus::Processing | api::OrderStatus::Valid) => {
                log::debug!("Order {} was finalized before", self.url);
            }

            Some(api::OrderStatus::Invalid) => {
                return Err(order_invalid(&self.url, self.api_order.clone()))
            }

            status => {
                return Err(Error::local(format!(
                    "order {} is not ready to be finalized (status {status:?})",
                    self.url,
                )))
            }
        }

        if self.api_order.is_status_valid() {
            return Ok(());
        }

        if let Some(delay) = retry_after {
            let wake = Instant::now()
                .checked_add(delay)
                .map_or(deadline, |at| at.min(deadline));
            tokio::time::sleep_until(wake).await;
        }

        let inner = &self.inner;
        let url = self.url.as_str();

        // processing -> valid: cert is issued
        // invalid: the whole thing is off
        let api_order = poll_until(policy, deadline, "order", url, move || async move {
            let (api_order, retry_after) = fetch_order(inner, url).await?;

            match api_order.status() {
                Some(api::OrderStatus::Valid) => Ok(Poll::Done(api_order)),
                Some(api::OrderStatus::Invalid) => Err(order_invalid(url, api_order)),
                _ => Ok(Poll::Pending(retry_after)),
            }
        })
        .await?;

        self.api_order.overwrite(api_order)?;
        Ok(())
    }

    /// Creates a CSR for the order's identifiers from `signing_key` and finalizes with it.
    ///
    /// The first DNS identifier becomes the CSR's CN; all identifiers go into the SAN extension.
    pub async fn finalize_with_key(
        &mut self,
        signing_key: &p256::ecdsa::SigningKey,
        policy: &PollPolicy,
    ) -> Result<()> {
        let csr = create_csr(signing_key, &self.api_order.identifiers)?;
        self.finalize(&csr, policy).await
    }

    /// Request download of the issued certificate.
    ///
    /// This is the CA's default chain. Alternate chains it offers are listed in
    /// [`Certificate::alternates()`] and are only fetched by [`download_alternate`].
    ///
    /// [`download_alternate`]: Self::download_alternate()
    pub async fn download_certificate(&self) -> Result<Certificate> {
        let url = match (&self.api_order.certificate, self.api_order.is_status_valid()) {
            (Some(url), true) => url,
            _ => {
                return Err(Error::local(format!(
                    "order {} has no certificate yet (status {:?})",
                    self.url,
                    self.api_order.status(),
                )))
            }
        };

        self.download(url).await
    }

    /// Downloads one of the alternate chains listed by a previous download.
    pub async fn download_alternate(&self, url: &str) -> Result<Certificate> {
        self.download(url).await
    }

    async fn download(&self, url: &str) -> Result<Certificate> {
        let res = self.inner.post_as_get_accept(url, ACCEPT_PEM_CHAIN).await?;

        let alternates = res.links("alternate");
        let certificate = res.text();

        if certificate.trim().is_empty() {
            return Err(Error::protocol(format!("empty certificate at {url}")));
        }

        log::debug!(
            "Downloaded certificate from {url} ({} alternate chain(s))",
            alternates.len(),
        );

        Ok(Certificate::new(certificate, alternates))
    }
}

/// Fetches the order (POST-as-GET), with the CA's `Retry-After` hint.
async fn fetch_order(inner: &AccountInner, url: &str) -> Result<(api::Order, Option<Duration>)> {
    let res = inner.post_as_get(url).await?;
    let retry_after = res.retry_after();
    Ok((res.json()?, retry_after))
}

fn order_invalid(url: &str, api_order: api::Order) -> Error {
    Error::OrderInvalid {
        url: url.to_owned(),
        problem: api_order.error,
    }
}
