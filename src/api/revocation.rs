use serde::{Deserialize, Serialize};

/// Payload of a `revokeCert` request, see [RFC 8555 §7.6].
///
/// [RFC 8555 §7.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.6
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    /// base64url of the end-entity certificate's DER encoding.
    pub certificate: String,

    /// CRL reason code ([RFC 5280 §5.3.1]). Absent rather than `0` for an unspecified reason.
    ///
    /// [RFC 5280 §5.3.1]: https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<u8>,
}

impl Revocation {
    pub(crate) fn new(cert_der: &[u8], reason: Option<u8>) -> Self {
        Self {
            certificate: crate::jws::base64url(cert_der),
            reason,
        }
    }
}
