use serde::{Deserialize, Serialize};

use crate::jws::Jwk;

/// Inner payload of an account key rollover.
///
/// Signed with the new key and wrapped in an outer request signed with the old one.
///
/// See [RFC 8555 §7.3.5].
///
/// [RFC 8555 §7.3.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.5
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyChange {
    /// URL of the account being modified.
    pub account: String,

    /// JWK of the key currently bound to the account.
    pub old_key: Jwk,
}
