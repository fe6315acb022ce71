use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{
    acc::{validate_contacts, AcmeKey},
    api,
    error::*,
    nonce::NoncePool,
    req::{HttpClient, ReqwestClient},
    trans::Transport,
    Account,
};

const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory.
    ///
    /// Not appropriate for testing / development.
    LetsEncrypt,

    /// The staging Let's Encrypt directory.
    ///
    /// Use for testing and development. Doesn't issue "valid" certificates. The root signing
    /// certificate is not supposed to be in any trust chains.
    LetsEncryptStaging,

    /// Provide an arbitrary director URL to connect to.
    Other(&'a str),
}

impl<'a> DirectoryUrl<'a> {
    fn to_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT_URL,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING_URL,
            DirectoryUrl::Other(url) => url,
        }
    }
}

/// Entry point for accessing an ACME API.
///
/// Holds the endpoint map of the CA for the lifetime of the session, together with the nonce pool
/// shared by every account created from it. Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct Directory {
    url: Arc<str>,
    transport: Transport,
    api_directory: Arc<RwLock<api::Directory>>,
}

impl Directory {
    /// Fetches the directory using the default [`ReqwestClient`].
    pub async fn fetch(url: DirectoryUrl<'_>) -> Result<Directory> {
        let client = ReqwestClient::new()?;
        Self::fetch_with_client(url, Arc::new(client)).await
    }

    /// Fetches the directory over a caller-provided transport.
    ///
    /// Any failure here is fatal for the session; there is no partially usable directory.
    pub async fn fetch_with_client(
        url: DirectoryUrl<'_>,
        client: Arc<dyn HttpClient>,
    ) -> Result<Directory> {
        let url = url.to_url();

        let transport = Transport::new(client, Arc::new(NoncePool::default()));
        let api_directory = fetch_api_directory(&transport, url).await?;
        transport.nonce_pool().set_nonce_url(&api_directory.new_nonce);

        Ok(Directory {
            url: Arc::from(url),
            transport,
            api_directory: Arc::new(RwLock::new(api_directory)),
        })
    }

    /// Fetches the directory again, picking up rotated endpoints.
    ///
    /// Accounts created from this directory see the new endpoints as well. On failure the
    /// previous endpoints stay in place.
    pub async fn refresh(&self) -> Result<api::Directory> {
        let api_directory = fetch_api_directory(&self.transport, &self.url).await?;

        let nonce_changed = self.api_directory.read().new_nonce != api_directory.new_nonce;
        if nonce_changed {
            self.transport
                .nonce_pool()
                .set_nonce_url(&api_directory.new_nonce);
        }

        *self.api_directory.write() = api_directory.clone();
        Ok(api_directory)
    }

    /// Registers an account for `key` with the CA.
    ///
    /// If the key is already registered, the CA answers with the existing account and that is
    /// returned instead; registering is idempotent.
    ///
    /// `agree_to_terms` states that the terms of service linked from
    /// [`DirectoryMeta::terms_of_service`] have been agreed to.
    ///
    /// [`DirectoryMeta::terms_of_service`]: crate::api::DirectoryMeta::terms_of_service
    pub async fn register_account(
        &self,
        key: Arc<AcmeKey>,
        contact: Vec<String>,
        agree_to_terms: bool,
    ) -> Result<Account> {
        validate_contacts(&contact)?;

        if self.api_directory.read().external_account_required() {
            return Err(Error::local(
                "CA requires external account binding, which is not supported",
            ));
        }

        let acc = api::Account {
            contact: (!contact.is_empty()).then_some(contact),
            terms_of_service_agreed: Some(agree_to_terms),
            ..Default::default()
        };

        self.new_account(key, &acc).await
    }

    /// Looks up the account already registered for `key`, without creating one.
    ///
    /// Fails with a CA problem of type `accountDoesNotExist` if there is none.
    pub async fn load_existing_account(&self, key: Arc<AcmeKey>) -> Result<Account> {
        let acc = api::Account {
            only_return_existing: Some(true),
            ..Default::default()
        };

        self.new_account(key, &acc).await
    }

    async fn new_account(&self, key: Arc<AcmeKey>, acc: &api::Account) -> Result<Account> {
        let new_account_url = self.endpoint(api::Resource::NewAccount)?;

        let res = self
            .transport
            .call_jwk(&new_account_url, &key, acc)
            .await?;

        // RFC 8555 §7.3.1: an existing account is answered with 200, a new one with 201. Both
        // carry the account URL, which is the key ID, in Location.
        let kid = res.expect_header("location")?;
        if res.status == 200 {
            log::debug!("Account already exists, key ID is: {kid}");
        } else {
            log::debug!("Key ID is: {kid}");
        }

        let api_account = res.json::<api::Account>()?;

        Ok(Account::new(
            self.transport.clone(),
            self.clone(),
            key,
            kid,
            api_account,
        ))
    }

    /// URL of `resource`, failing if the CA does not offer it.
    pub(crate) fn endpoint(&self, resource: api::Resource) -> Result<String> {
        self.api_directory
            .read()
            .endpoint(resource)
            .map(str::to_owned)
            .ok_or_else(|| Error::protocol(format!("directory has no {resource} endpoint")))
    }

    /// Returns a copy of the directory's API object.
    pub fn api_directory(&self) -> api::Directory {
        self.api_directory.read().clone()
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("url", &self.url)
            .field("api_directory", &*self.api_directory.read())
            .finish_non_exhaustive()
    }
}

async fn fetch_api_directory(transport: &Transport, url: &str) -> Result<api::Directory> {
    let res = transport.get(url).await.map_err(|err| match err {
        // no problem document is honored here, a broken directory ends the session
        Error::Ca { status, problem, .. } if status >= 500 => {
            Error::transport(format!("directory fetch failed: HTTP {status}: {problem}"))
        }
        Error::Ca { status, problem, .. } => {
            Error::protocol(format!("directory fetch failed: HTTP {status}: {problem}"))
        }
        err => err,
    })?;

    res.json::<api::Directory>()
}
