use std::{
    io::{BufReader, Cursor},
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use der::{
    asn1::{Ia5String, OctetString},
    oid::ObjectIdentifier,
    time::{OffsetDateTime, PrimitiveDateTime},
    Decode as _, Encode as _,
};
use eyre::{eyre, WrapErr as _};
use x509_cert::{
    builder::{Builder, RequestBuilder as CsrBuilder},
    ext::{
        pkix::{name::GeneralName, SubjectAltName},
        Extension,
    },
    name::Name,
    request::CertReq,
};

use crate::{api::Identifier, error::*};

/// PKCS#9 `extensionRequest` attribute.
const ID_EXTENSION_REQ: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

/// X.520 `commonName`.
const ID_AT_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// `id-ce-subjectAltName`.
const ID_CE_SUBJECT_ALT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");

/// Make a P-256 private key (from which we can derive a public key).
pub fn create_p256_key() -> p256::ecdsa::SigningKey {
    let csprng = &mut rand::thread_rng();
    ecdsa::SigningKey::from(p256::SecretKey::random(csprng))
}

/// Creates a DER encoded CSR for `identifiers`, signed with `signer`.
///
/// The first DNS identifier is picked for the CSR's Common Name (CN). All identifiers are added to
/// a Subject Alternative Name (SAN) extension.
pub(crate) fn create_csr(
    signer: &p256::ecdsa::SigningKey,
    identifiers: &[Identifier],
) -> Result<Vec<u8>> {
    let build_err = |err: &dyn std::fmt::Display| Error::local(format!("build csr: {err}"));

    let subject = match identifiers.iter().find(|id| id.is_type_dns()) {
        Some(primary) => format!("CN={}", primary.value)
            .parse::<Name>()
            .map_err(|err| build_err(&err))?,
        None => Name::default(),
    };

    let san = identifiers
        .iter()
        .map(|id| {
            if id.is_type_ip() {
                let addr = id
                    .value
                    .parse::<IpAddr>()
                    .map_err(|err| build_err(&err))?;

                let octets = match addr {
                    IpAddr::V4(v4) => v4.octets().to_vec(),
                    IpAddr::V6(v6) => v6.octets().to_vec(),
                };

                Ok(GeneralName::IpAddress(
                    OctetString::new(octets).map_err(|err| build_err(&err))?,
                ))
            } else {
                Ok(GeneralName::DnsName(
                    Ia5String::new(&id.value).map_err(|err| build_err(&err))?,
                ))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let mut csr = CsrBuilder::new(subject, signer).map_err(|err| build_err(&err))?;

    csr.add_extension(&SubjectAltName(san))
        .map_err(|err| build_err(&err))?;

    csr.build::<p256::ecdsa::DerSignature>()
        .map_err(|err| build_err(&err))?
        .to_der()
        .map_err(|err| build_err(&err))
}

/// Identifiers requested by a DER encoded CSR: the subject CN and every SAN entry.
pub(crate) fn csr_identifiers(csr_der: &[u8]) -> Result<Vec<Identifier>> {
    let csr = CertReq::from_der(csr_der)
        .map_err(|err| Error::local(format!("CSR is not valid DER: {err}")))?;

    let mut identifiers = Vec::new();

    for rdn in csr.info.subject.0.iter() {
        for atv in rdn.0.iter() {
            if atv.oid == ID_AT_COMMON_NAME {
                let cn = std::str::from_utf8(atv.value.value())
                    .map_err(|_| Error::local("CSR common name is not a string"))?;
                let id = match cn.parse::<IpAddr>() {
                    Ok(addr) => Identifier::ip(addr),
                    Err(_) => Identifier::dns(cn),
                };
                identifiers.push(id);
            }
        }
    }

    for attr in csr.info.attributes.iter() {
        if attr.oid != ID_EXTENSION_REQ {
            continue;
        }

        for value in attr.values.iter() {
            let extensions = value
                .to_der()
                .and_then(|der| Vec::<Extension>::from_der(&der))
                .map_err(|err| Error::local(format!("malformed CSR extensions: {err}")))?;

            for ext in extensions {
                if ext.extn_id != ID_CE_SUBJECT_ALT_NAME {
                    continue;
                }

                let san = SubjectAltName::from_der(ext.extn_value.as_bytes())
                    .map_err(|err| Error::local(format!("malformed CSR SAN: {err}")))?;

                for name in san.0 {
                    identifiers.push(general_name_identifier(&name)?);
                }
            }
        }
    }

    Ok(identifiers)
}

fn general_name_identifier(name: &GeneralName) -> Result<Identifier> {
    match name {
        GeneralName::DnsName(dns) => Ok(Identifier::dns(&dns.to_string())),
        GeneralName::IpAddress(octets) => {
            let addr = match octets.as_bytes() {
                &[a, b, c, d] => IpAddr::V4(Ipv4Addr::new(a, b, c, d)),
                bytes => <[u8; 16]>::try_from(bytes)
                    .map(|v6| IpAddr::V6(Ipv6Addr::from(v6)))
                    .map_err(|_| Error::local("CSR SAN holds a malformed IP address"))?,
            };
            Ok(Identifier::ip(addr))
        }
        other => Err(Error::local(format!(
            "CSR SAN holds an entry ACME cannot validate: {other:?}",
        ))),
    }
}

/// Issued certificate chain, as downloaded from the order's certificate URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    certificate: String,
    alternates: Vec<String>,
}

impl Certificate {
    pub(crate) fn new(certificate: String, alternates: Vec<String>) -> Self {
        Certificate {
            certificate,
            alternates,
        }
    }

    /// Parses a PEM chain obtained elsewhere, e.g. loaded back from disk.
    pub fn parse(certificate: String) -> eyre::Result<Self> {
        let cert = Certificate::new(certificate, Vec::new());

        let chain = cert.certificate_chain()?;
        let ee = chain.first().ok_or_else(|| eyre!("no certificates in chain"))?;
        x509_cert::Certificate::from_der(ee).context("invalid end-entity certificate")?;

        Ok(cert)
    }

    /// The issued certificate chain in PEM format, end-entity certificate first.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// URLs of alternate chains the CA offered with this one.
    ///
    /// These are never fetched implicitly; see [`Order::download_alternate()`].
    ///
    /// [`Order::download_alternate()`]: crate::order::Order::download_alternate()
    pub fn alternates(&self) -> &[String] {
        &self.alternates
    }

    /// The issued certificate chain in DER format.
    pub fn certificate_chain(&self) -> eyre::Result<Vec<Vec<u8>>> {
        let mut rdr = BufReader::new(Cursor::new(self.certificate()));

        rustls_pemfile::certs(&mut rdr)
            .map(|res| res.map(|cert| cert.to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Inspect the certificate to count the number of (whole) valid days left.
    ///
    /// It's up to the ACME API provider to decide how long an issued certificate is valid.
    /// Let's Encrypt sets the validity to 90 days. This function reports 89 days for newly
    /// issued cert, since it counts _whole_ days.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> eyre::Result<i64> {
        let cert_chain = self.certificate_chain()?;
        let cert_ee = cert_chain
            .first() // EE cert is first
            .ok_or_else(|| eyre!("no certificates in chain"))?;

        let cert = x509_cert::Certificate::from_der(cert_ee)?;

        let not_after = cert.tbs_certificate.validity.not_after.to_date_time();
        // X.509 validity times are always UTC
        let not_after = PrimitiveDateTime::try_from(not_after)
            .context("certificate notAfter out of range")?
            .assume_utc();

        let diff = not_after - OffsetDateTime::now_utc();

        Ok(diff.whole_days())
    }
}
