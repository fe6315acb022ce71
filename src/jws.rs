//! Request signing.
//!
//! See [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2).

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::{acc::AcmeKey, error::*};

/// Algorithms this crate can sign with.
///
/// > An ACME server MUST implement the "ES256" signature algorithm (RFC 7518).
pub(crate) const SUPPORTED_ALGORITHMS: &[&str] = &["ES256"];

pub(crate) fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

/// JWT Protected Header scheme as defined in [RFC 8555 §6.2].
///
/// > For newAccount requests, and for revokeCert requests authenticated by a certificate key,
/// there MUST be a "jwk" field. This field MUST contain the public key corresponding to the
/// private key used to sign the JWS.
/// >
/// > For all other requests, the request is signed using an existing account, and there MUST be a
/// "kid" field. This field MUST contain the account URL received by POSTing to the newAccount
/// resource.
///
/// [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2
#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct JwsProtectedHeader {
    /// Algorithm.
    ///
    /// This field MUST NOT contain "none" or a Message Authentication Code (MAC) algorithm.
    alg: String,

    /// A unique value that enables the verifier of a JWS to recognize when replay has occurred.
    ///
    /// Absent only in the inner JWS of a key rollover, see [RFC 8555 §7.3.5].
    ///
    /// [RFC 8555 §7.3.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.5
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,

    /// Defined in [RFC 8555 §6.4].
    ///
    /// > The "url" header parameter specifies the URL (RFC 3986) to which this JWS object is
    /// directed.
    ///
    /// [RFC 8555 §6.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.4
    url: String,

    /// JSON Web Key.
    ///
    /// Mutually exclusive with `kid` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,

    /// Key ID.
    ///
    /// Mutually exclusive with `jwk` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl JwsProtectedHeader {
    pub(crate) fn new_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: jwk.alg.clone(),
            url: url.to_owned(),
            nonce: Some(nonce),
            jwk: Some(jwk),
            ..Default::default()
        }
    }

    pub(crate) fn new_kid(alg: &str, kid: &str, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: alg.to_owned(),
            url: url.to_owned(),
            nonce: Some(nonce),
            kid: Some(kid.to_owned()),
            ..Default::default()
        }
    }

    /// Header of the inner, nonce-less JWS of a key rollover.
    pub(crate) fn new_key_change(jwk: Jwk, url: &str) -> Self {
        JwsProtectedHeader {
            alg: jwk.alg.clone(),
            url: url.to_owned(),
            jwk: Some(jwk),
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub(crate) fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }
}

/// Public part of an account key as JSON Web Key.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Jwk {
    alg: String,
    crv: String,
    kty: String,
    #[serde(rename = "use")]
    _use: String,
    x: String,
    y: String,
}

impl TryFrom<&AcmeKey> for Jwk {
    type Error = Error;

    fn try_from(a: &AcmeKey) -> Result<Self> {
        let point = a.signing_key().verifying_key().to_encoded_point(false);

        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(Error::local("account key is the identity point"));
        };

        Ok(Jwk {
            alg: a.algorithm().to_owned(),
            kty: "EC".to_owned(),
            crv: "P-256".to_owned(),
            _use: "sig".to_owned(),
            x: base64url(x),
            y: base64url(y),
        })
    }
}

impl Jwk {
    /// JWK thumbprint as defined in [RFC 7638], base64url-encoded.
    ///
    /// [RFC 7638]: https://datatracker.ietf.org/doc/html/rfc7638
    pub fn thumbprint(&self) -> Result<String> {
        let json = serde_json::to_string(&JwkThumb::from(self))?;
        Ok(base64url(&Sha256::digest(json)))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
// LEXICAL ORDER OF FIELDS MATTER!
pub(crate) struct JwkThumb {
    crv: String,
    kty: String,
    x: String,
    y: String,
}

impl From<&Jwk> for JwkThumb {
    fn from(a: &Jwk) -> Self {
        JwkThumb {
            crv: a.crv.clone(),
            kty: a.kty.clone(),
            x: a.x.clone(),
            y: a.y.clone(),
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FlattenedJsonJws {
    protected: String,
    payload: String,
    signature: String,
}

impl FlattenedJsonJws {
    pub(crate) fn new(protected: String, payload: String, signature: String) -> Self {
        FlattenedJsonJws {
            protected,
            payload,
            signature,
        }
    }

    #[cfg(test)]
    pub(crate) fn protected_header(&self) -> JwsProtectedHeader {
        let json = BASE64_URL_SAFE_NO_PAD.decode(&self.protected).unwrap();
        serde_json::from_slice(&json).unwrap()
    }

    #[cfg(test)]
    pub(crate) fn payload(&self) -> &str {
        &self.payload
    }
}

/// Construct JWS with protected header according to [RFC 7515 §5.1].
///
/// `payload` of `None` produces a POST-as-GET request whose payload segment is the empty string.
///
/// [RFC 7515 §5.1]: https://datatracker.ietf.org/doc/html/rfc7515#section-5.1
pub(crate) fn sign<T: Serialize + ?Sized>(
    protected: &JwsProtectedHeader,
    key: &AcmeKey,
    payload: Option<&T>,
) -> Result<FlattenedJsonJws> {
    if !SUPPORTED_ALGORITHMS.contains(&protected.alg.as_str()) || protected.alg != key.algorithm() {
        return Err(Error::local(format!(
            "unsupported signing algorithm {:?}",
            protected.alg,
        )));
    }

    let header = base64url(&serde_json::to_vec(protected)?);

    let payload = match payload {
        Some(payload) => base64url(&serde_json::to_vec(payload)?),
        None => String::new(),
    };

    let to_sign = format!("{header}.{payload}");
    let signature = base64url(&key.sign(to_sign.as_bytes())?);

    Ok(FlattenedJsonJws::new(header, payload, signature))
}

#[cfg(test)]
mod tests {
    use ecdsa::signature::Verifier as _;

    use super::*;

    fn verify(jws: &FlattenedJsonJws, key: &AcmeKey) {
        let message = format!("{}.{}", jws.protected, jws.payload);
        let sig_bytes = BASE64_URL_SAFE_NO_PAD.decode(&jws.signature).unwrap();
        let signature = p256::ecdsa::Signature::from_slice(&sig_bytes).unwrap();

        key.signing_key()
            .verifying_key()
            .verify(message.as_bytes(), &signature)
            .unwrap();
    }

    #[test]
    fn signs_kid_request() {
        let key = AcmeKey::generate();
        let protected = JwsProtectedHeader::new_kid(
            "ES256",
            "https://example.com/acme/acct/1",
            "https://example.com/acme/new-order",
            "nonce-1".to_owned(),
        );

        let jws = sign(&protected, &key, Some(&serde_json::json!({ "a": 1 }))).unwrap();
        verify(&jws, &key);

        let header = jws.protected_header();
        assert_eq!(header.nonce(), Some("nonce-1"));
        assert_eq!(header.kid.as_deref(), Some("https://example.com/acme/acct/1"));
        assert!(header.jwk.is_none());

        let payload = BASE64_URL_SAFE_NO_PAD.decode(jws.payload()).unwrap();
        assert_eq!(payload, br#"{"a":1}"#);
    }

    #[test]
    fn post_as_get_has_empty_payload() {
        let key = AcmeKey::generate();
        let protected = JwsProtectedHeader::new_kid(
            "ES256",
            "https://example.com/acme/acct/1",
            "https://example.com/acme/order/1",
            "nonce-2".to_owned(),
        );

        let jws = sign::<()>(&protected, &key, None).unwrap();
        assert_eq!(jws.payload(), "");
        verify(&jws, &key);

        // the payload member must be present, not omitted
        let json = serde_json::to_value(&jws).unwrap();
        assert_eq!(json["payload"], "");
    }

    #[test]
    fn rejects_unsupported_algorithm() {
        let key = AcmeKey::generate();
        let protected = JwsProtectedHeader::new_kid(
            "EdDSA",
            "https://example.com/acme/acct/1",
            "https://example.com/acme/order/1",
            "nonce-3".to_owned(),
        );

        let err = sign::<()>(&protected, &key, None).unwrap_err();
        assert!(matches!(err, Error::LocalValidation(_)));
    }

    #[test]
    fn thumbprint_is_stable_for_key() {
        let key = AcmeKey::generate();
        let jwk = Jwk::try_from(&key).unwrap();

        let thumb = jwk.thumbprint().unwrap();
        assert_eq!(thumb, Jwk::try_from(&key).unwrap().thumbprint().unwrap());

        // sha256 is 32 bytes, 43 chars unpadded base64url
        assert_eq!(thumb.len(), 43);
    }
}
