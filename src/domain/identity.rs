//! Service identities and the principals derived from them.
//!
//! Every RBAC principal and every SDS secret name in the compiler is derived
//! from a [`ServiceIdentity`] through the functions in this module, so there is
//! exactly one mapping from an identity to the string a proxy sees in a peer
//! certificate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trust domain appended to identities when none is configured.
pub const DEFAULT_TRUST_DOMAIN: &str = "cluster.local";

/// Identity value that matches every downstream.
pub const WILDCARD: &str = "*";

/// Workload identity, the service account a proxy runs as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub namespace: String,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into() }
    }

    /// The identity that stands for any downstream, used in permissive mode.
    pub fn wildcard() -> Self {
        Self { name: WILDCARD.to_string(), namespace: String::new() }
    }

    pub fn is_wildcard(&self) -> bool {
        self.name == WILDCARD
    }

    /// Canonical RBAC principal for this identity within `trust_domain`.
    pub fn principal(&self, trust_domain: &str) -> Principal {
        if self.is_wildcard() {
            return Principal::wildcard();
        }
        Principal(format!("{}.{}.{}", self.name, self.namespace, trust_domain))
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            return f.write_str(WILDCARD);
        }
        write!(f, "{}.{}", self.name, self.namespace)
    }
}

impl FromStr for ServiceIdentity {
    type Err = crate::Error;

    /// Parses the `name.namespace` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == WILDCARD {
            return Ok(Self::wildcard());
        }
        match s.split_once('.') {
            Some((name, namespace))
                if !name.is_empty() && !namespace.is_empty() && !namespace.contains('.') =>
            {
                Ok(Self::new(name, namespace))
            }
            _ => Err(crate::Error::validation_field(
                format!("service identity '{}' must have the form name.namespace", s),
                "identity",
            )),
        }
    }
}

/// An authenticated downstream principal as it appears in RBAC rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn wildcard() -> Self {
        Self(WILDCARD.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// SDS secret carrying the service certificate presented by `identity`.
pub fn service_cert_secret_name(identity: &ServiceIdentity) -> String {
    format!("service-cert:{}", identity)
}

/// SDS secret carrying the CA used to validate inbound mTLS peers of `identity`.
pub fn inbound_root_cert_secret_name(identity: &ServiceIdentity) -> String {
    format!("root-cert-for-mtls-inbound:{}", identity)
}

/// SDS secret carrying the CA used to validate upstream peers of `identity`.
pub fn outbound_root_cert_secret_name(identity: &ServiceIdentity) -> String {
    format!("root-cert-for-mtls-outbound:{}", identity)
}

/// SDS secret carrying the CA used to validate ingress gateway client certificates.
pub const INGRESS_ROOT_CERT_SECRET_NAME: &str = "root-cert-https";
