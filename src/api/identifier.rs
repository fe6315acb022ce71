use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// An identifier a certificate is requested for.
///
/// See [RFC 8555 §9.7.7] and [RFC 8738] for IP identifiers.
///
/// [RFC 8555 §9.7.7]: https://datatracker.ietf.org/doc/html/rfc8555#section-9.7.7
/// [RFC 8738]: https://datatracker.ietf.org/doc/html/rfc8738
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub _type: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: &str) -> Self {
        Self {
            _type: "dns".to_owned(),
            value: value.to_owned(),
        }
    }

    pub fn ip(addr: IpAddr) -> Self {
        Self {
            _type: "ip".to_owned(),
            value: addr.to_string(),
        }
    }

    pub fn is_type_dns(&self) -> bool {
        self._type == "dns"
    }

    pub fn is_type_ip(&self) -> bool {
        self._type == "ip"
    }

    /// Comparison key: DNS names compare case-insensitively, IP addresses by value.
    pub(crate) fn normalized(&self) -> (String, String) {
        let value = match self.value.parse::<IpAddr>() {
            Ok(addr) if self.is_type_ip() => addr.to_string(),
            _ => self.value.trim_end_matches('.').to_ascii_lowercase(),
        };

        (self._type.to_ascii_lowercase(), value)
    }

    /// Returns true if both name the same thing, ignoring DNS case.
    pub fn matches(&self, other: &Identifier) -> bool {
        self.normalized() == other.normalized()
    }
}
