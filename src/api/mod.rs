//! JSON API payloads.
//!
//! These mirror the objects defined in [RFC 8555 §7.1]. They are exposed so callers can inspect
//! server state and persist what they need (e.g. account and order URLs).
//!
//! [RFC 8555 §7.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1

use std::fmt;

use serde::{
    ser::{SerializeMap as _, Serializer},
    Deserialize, Serialize,
};

mod account;
mod authorization;
mod challenge;
mod directory;
mod finalize;
mod identifier;
mod key_change;
mod order;
mod revocation;

pub use self::{
    account::{Account, AccountStatus},
    authorization::{Authorization, AuthorizationStatus},
    challenge::{Challenge, ChallengeStatus},
    directory::{Directory, DirectoryMeta, Resource},
    finalize::Finalize,
    identifier::Identifier,
    key_change::KeyChange,
    order::{Order, OrderStatus},
    revocation::Revocation,
};
pub use crate::jws::Jwk;

pub(crate) use self::order::same_identifiers;

const ERROR_NS: &str = "urn:ietf:params:acme:error:";

/// Serializes to `{}`.
pub struct EmptyObject;

impl Serialize for EmptyObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

/// Problem document as returned by the CA on errors.
///
/// See [RFC 8555 §6.7] and [RFC 7807].
///
/// [RFC 8555 §6.7]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.7
/// [RFC 7807]: https://datatracker.ietf.org/doc/html/rfc7807
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub _type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Echo of the HTTP status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Problems scoped to individual identifiers of a multi-identifier request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subproblems: Option<Vec<Subproblem>>,
}

impl Problem {
    /// Returns the short ACME error name, e.g. `badNonce` for
    /// `urn:ietf:params:acme:error:badNonce`.
    pub fn kind(&self) -> &str {
        self._type
            .strip_prefix(ERROR_NS)
            .or_else(|| self._type.strip_prefix("urn:acme:error:"))
            .unwrap_or(&self._type)
    }

    /// Returns true if problem type is "badNonce".
    pub fn is_bad_nonce(&self) -> bool {
        self.kind() == "badNonce"
    }

    /// Returns true if problem type is "rateLimited".
    pub fn is_rate_limited(&self) -> bool {
        self.kind() == "rateLimited"
    }

    /// Returns true if problem type is "accountDoesNotExist".
    pub fn is_account_does_not_exist(&self) -> bool {
        self.kind() == "accountDoesNotExist"
    }

    /// Values of the identifiers named by subproblems.
    pub fn failed_identifiers(&self) -> impl Iterator<Item = &str> {
        self.subproblems
            .iter()
            .flatten()
            .filter_map(|sub| sub.identifier.as_ref())
            .map(|id| id.value.as_str())
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type)?,
            _ => write!(f, "{}", self._type)?,
        }

        for sub in self.subproblems.iter().flatten() {
            write!(f, "; {sub}")?;
        }

        Ok(())
    }
}

/// Problem scoped to one identifier.
///
/// See [RFC 8555 §6.7.1](https://datatracker.ietf.org/doc/html/rfc8555#section-6.7.1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub _type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<identifier::Identifier>,
}

impl fmt::Display for Subproblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.identifier {
            write!(f, "[{}] ", id.value)?;
        }

        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type),
            _ => write!(f, "{}", self._type),
        }
    }
}
