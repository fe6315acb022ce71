use std::fmt;

use serde::{Deserialize, Serialize};

/// Endpoint map published by the CA, fetched once at session start.
///
/// Field names follow [RFC 8555 §7.1.1]. `newAuthz` is optional because pre-authorization is
/// optional for servers; everything else must be present or the directory is rejected.
///
/// ```json
/// {
///   "newNonce": "https://ca.test/acme/new-nonce",
///   "newAccount": "https://ca.test/acme/new-acct",
///   "newOrder": "https://ca.test/acme/new-order",
///   "revokeCert": "https://ca.test/acme/revoke-cert",
///   "keyChange": "https://ca.test/acme/key-change",
///   "meta": { "termsOfService": "https://ca.test/terms.pdf" }
/// }
/// ```
///
/// [RFC 8555 §7.1.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.1
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_authz: Option<String>,
    pub revoke_cert: String,
    pub key_change: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

impl Directory {
    /// URL of `resource`, or `None` if the CA does not offer it.
    pub fn endpoint(&self, resource: Resource) -> Option<&str> {
        match resource {
            Resource::NewNonce => Some(&self.new_nonce),
            Resource::NewAccount => Some(&self.new_account),
            Resource::NewOrder => Some(&self.new_order),
            Resource::NewAuthz => self.new_authz.as_deref(),
            Resource::RevokeCert => Some(&self.revoke_cert),
            Resource::KeyChange => Some(&self.key_change),
        }
    }

    /// True if `newAccount` requests must carry an external account binding.
    pub fn external_account_required(&self) -> bool {
        self.meta
            .as_ref()
            .is_some_and(DirectoryMeta::external_account_required)
    }
}

/// Operations named in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    NewNonce,
    NewAccount,
    NewOrder,
    NewAuthz,
    RevokeCert,
    KeyChange,
}

impl Resource {
    /// Key of this resource in the directory object.
    pub fn as_str(self) -> &'static str {
        match self {
            Resource::NewNonce => "newNonce",
            Resource::NewAccount => "newAccount",
            Resource::NewOrder => "newOrder",
            Resource::NewAuthz => "newAuthz",
            Resource::RevokeCert => "revokeCert",
            Resource::KeyChange => "keyChange",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional `meta` object of the directory.
///
/// See <https://datatracker.ietf.org/doc/html/rfc8555#section-9.7.6>.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    /// Current terms of service, which `termsOfServiceAgreed` refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// Hostnames the CA recognizes as itself in CAA records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caa_identities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_account_required: Option<bool>,
}

impl DirectoryMeta {
    pub fn external_account_required(&self) -> bool {
        self.external_account_required.unwrap_or(false)
    }
}
