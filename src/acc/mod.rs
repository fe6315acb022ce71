use std::{collections::BTreeSet, iter, sync::Arc};

use parking_lot::RwLock;

use crate::{
    api,
    cert::Certificate,
    dir::Directory,
    error::*,
    jws::{self, JwsProtectedHeader},
    order::Order,
    req::HttpResponse,
    trans::Transport,
};

mod acme_key;

pub use self::acme_key::AcmeKey;

#[derive(Debug)]
pub(crate) struct AccountInner {
    pub transport: Transport,
    pub directory: Directory,

    /// Account URL, used as key ID.
    pub kid: String,

    key: RwLock<Arc<AcmeKey>>,
    api_account: RwLock<api::Account>,
}

impl AccountInner {
    /// Current account key. The handle is cloned out so no lock is held across a request.
    pub(crate) fn key(&self) -> Arc<AcmeKey> {
        Arc::clone(&self.key.read())
    }

    pub(crate) async fn call<T>(&self, url: &str, payload: &T) -> Result<HttpResponse>
    where
        T: serde::Serialize + ?Sized,
    {
        let key = self.key();
        self.transport.call_kid(url, &key, &self.kid, payload).await
    }

    pub(crate) async fn post_as_get(&self, url: &str) -> Result<HttpResponse> {
        let key = self.key();
        self.transport.post_as_get(url, &key, &self.kid).await
    }

    pub(crate) async fn post_as_get_accept(
        &self,
        url: &str,
        accept: &'static str,
    ) -> Result<HttpResponse> {
        let key = self.key();
        self.transport
            .post_as_get_accept(url, Some(accept), &key, &self.kid)
            .await
    }
}

/// Account with an ACME provider.
///
/// Accounts are created using [`Directory::register_account()`] and consist of contact addresses
/// and a private key for signing requests to the ACME API. The account URL doubles as key ID and
/// can be persisted to find the account again.
///
/// This library uses elliptic curve P-256 for accessing the account.
///
/// [`Directory::register_account()`]: crate::Directory::register_account()
#[derive(Debug, Clone)]
pub struct Account {
    inner: Arc<AccountInner>,
}

impl Account {
    pub(crate) fn new(
        transport: Transport,
        directory: Directory,
        key: Arc<AcmeKey>,
        kid: String,
        api_account: api::Account,
    ) -> Self {
        Self {
            inner: Arc::new(AccountInner {
                transport,
                directory,
                kid,
                key: RwLock::new(key),
                api_account: RwLock::new(api_account),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<AccountInner> {
        &self.inner
    }

    /// The account URL.
    pub fn url(&self) -> &str {
        &self.inner.kid
    }

    /// The key currently bound to this account.
    pub fn key(&self) -> Arc<AcmeKey> {
        self.inner.key()
    }

    /// Last known state of the account as reported by the CA.
    pub fn api_account(&self) -> api::Account {
        self.inner.api_account.read().clone()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.inner.api_account.read().is_status_deactivated() {
            return Err(Error::local(format!(
                "account {} is deactivated",
                self.inner.kid,
            )));
        }

        Ok(())
    }

    /// Re-reads the account from the CA (POST-as-GET).
    pub async fn refresh(&self) -> Result<api::Account> {
        let res = self.inner.post_as_get(&self.inner.kid).await?;
        let api_account = res.json::<api::Account>()?;
        *self.inner.api_account.write() = api_account.clone();
        Ok(api_account)
    }

    /// Replaces the contact addresses of the account.
    pub async fn update(&self, contact: Vec<String>) -> Result<api::Account> {
        self.ensure_active()?;
        validate_contacts(&contact)?;

        let update = api::Account {
            contact: Some(contact),
            ..Default::default()
        };

        let res = self.inner.call(&self.inner.kid, &update).await?;
        let api_account = res.json::<api::Account>()?;
        *self.inner.api_account.write() = api_account.clone();

        log::debug!("Updated contacts of account {}", self.inner.kid);
        Ok(api_account)
    }

    /// Deactivates the account.
    ///
    /// This cannot be undone. The CA rejects every further request signed by this account.
    pub async fn deactivate(&self) -> Result<()> {
        let res = self
            .inner
            .call(&self.inner.kid, &api::Account::deactivation())
            .await?;
        let api_account = res.json::<api::Account>()?;

        if !api_account.is_status_deactivated() {
            return Err(Error::protocol(format!(
                "account deactivation answered with status {:?}",
                api_account.status,
            )));
        }

        *self.inner.api_account.write() = api_account;

        log::debug!("Deactivated account {}", self.inner.kid);
        Ok(())
    }

    /// Binds a new key to the account ("key rollover").
    ///
    /// See [RFC 8555 §7.3.5](https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.5).
    pub async fn change_key(&self, new_key: Arc<AcmeKey>) -> Result<()> {
        self.ensure_active()?;

        let url = self.inner.directory.endpoint(api::Resource::KeyChange)?;
        let old_key = self.inner.key();

        let key_change = api::KeyChange {
            account: self.inner.kid.clone(),
            old_key: old_key.jwk()?,
        };

        let protected = JwsProtectedHeader::new_key_change(new_key.jwk()?, &url);
        let inner_jws = jws::sign(&protected, &new_key, Some(&key_change))?;

        self.inner
            .transport
            .call_kid(&url, &old_key, &self.inner.kid, &inner_jws)
            .await?;

        *self.inner.key.write() = new_key;

        log::debug!("Rolled over key of account {}", self.inner.kid);
        Ok(())
    }

    /// Create a new order to issue a certificate for this account.
    ///
    /// Each order has a required `primary_name` (which will be set as the certificates `CN`) and a
    /// variable number of `alt_names`. Names differing only in case are requested once.
    ///
    /// This library doesn't constrain the number of `alt_names`, but it is limited by the ACME API
    /// provider. Let's Encrypt [sets a max of 100 names] per certificate.
    ///
    /// Every call creates a new order with the ACME API provider, even when the domain names
    /// supplied are exactly the same.
    ///
    /// [sets a max of 100 names]: https://letsencrypt.org/docs/rate-limits/
    pub async fn new_order(&self, primary_name: &str, alt_names: &[&str]) -> Result<Order> {
        let identifiers = iter::once(primary_name)
            .chain(alt_names.iter().copied())
            .map(api::Identifier::dns)
            .collect();

        self.new_order_for(identifiers).await
    }

    /// Create a new order for arbitrary identifiers, e.g. IP addresses.
    pub async fn new_order_for(&self, identifiers: Vec<api::Identifier>) -> Result<Order> {
        self.ensure_active()?;

        let mut dedup = BTreeSet::new();
        let identifiers = identifiers
            .into_iter()
            .filter(|id| dedup.insert(id.normalized()))
            .collect::<Vec<_>>();

        if identifiers.is_empty() {
            return Err(Error::local("an order needs at least one identifier"));
        }

        let order = api::Order::from_identifiers(identifiers);
        let new_order_url = self.inner.directory.endpoint(api::Resource::NewOrder)?;

        let res = self.inner.call(&new_order_url, &order).await?;
        let order_url = res.expect_header("location")?;
        let api_order = res.json::<api::Order>()?;

        log::debug!("Created order {order_url}");

        let mut order = Order::new(&self.inner, order, order_url);
        order.api_order.overwrite(api_order)?;
        Ok(order)
    }

    /// Resumes an order from its URL, e.g. one persisted before a restart.
    pub async fn order(&self, order_url: &str) -> Result<Order> {
        let res = self.inner.post_as_get(order_url).await?;
        let api_order = res.json::<api::Order>()?;
        Ok(Order::new(&self.inner, api_order, order_url.to_owned()))
    }

    /// Revoke a certificate for the reason given.
    pub async fn revoke_certificate(
        &self,
        cert: &Certificate,
        reason: RevocationReason,
    ) -> Result<()> {
        let chain = cert
            .certificate_chain()
            .map_err(|err| Error::local(format!("unreadable certificate: {err}")))?;
        let ee = chain
            .first()
            .ok_or_else(|| Error::local("no certificates in chain"))?;

        // an unspecified reason is sent as no reason, see RFC 5280 §5.3.1
        let reason = (reason != RevocationReason::Unspecified).then_some(reason as u8);
        let revocation = api::Revocation::new(ee, reason);

        let url = self.inner.directory.endpoint(api::Resource::RevokeCert)?;
        self.inner.call(&url, &revocation).await?;

        Ok(())
    }
}

/// Checks contact URIs before they are sent to the CA.
///
/// `mailto:` URIs must name exactly one address and carry no header fields, see
/// [RFC 8555 §7.3](https://datatracker.ietf.org/doc/html/rfc8555#section-7.3).
pub(crate) fn validate_contacts(contact: &[String]) -> Result<()> {
    for uri in contact {
        let Some((scheme, rest)) = uri.split_once(':') else {
            return Err(Error::local(format!("contact {uri:?} is not a URI")));
        };

        if !scheme.eq_ignore_ascii_case("mailto") {
            continue;
        }

        if rest.contains('?') {
            return Err(Error::local(format!(
                "contact {uri:?} must not contain header fields",
            )));
        }

        if rest.contains(',') || rest.matches('@').count() != 1 {
            return Err(Error::local(format!(
                "contact {uri:?} must contain exactly one address",
            )));
        }
    }

    Ok(())
}

/// Enumeration of reasons for revocation.
///
/// The reason codes are taken from [RFC 5280 §5.3.1].
///
/// [RFC 5280 §5.3.1]: https://tools.ietf.org/html/rfc5280#section-5.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CACompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    // value 7 is not used
    RemoveFromCRL = 8,
    PrivilegeWithdrawn = 9,
    AACompromise = 10,
}
