//! Certificate issuance and the SDS secrets built from it.
//!
//! The compiler never manages certificate lifecycle. It asks a
//! [`CertificateManager`] for the proxy's certificate once per pass and turns
//! the PEM material into the secrets its transport sockets reference by name.

use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    secret, CertificateValidationContext, Secret, TlsCertificate,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::domain::identity::{
    inbound_root_cert_secret_name, outbound_root_cert_secret_name, service_cert_secret_name,
    INGRESS_ROOT_CERT_SECRET_NAME,
};
use crate::domain::ServiceIdentity;
use crate::{Error, Result};

/// Validity requested for service certificates.
pub const SERVICE_CERT_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

pub const CERT_CHAIN_FILE: &str = "cert.pem";
pub const PRIVATE_KEY_FILE: &str = "key.pem";
pub const ISSUING_CA_FILE: &str = "ca.pem";

/// PEM-encoded certificate material.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    pub common_name: String,
    pub certificate_chain: Vec<u8>,
    pub private_key: Vec<u8>,
    pub issuing_ca: Vec<u8>,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("common_name", &self.common_name)
            .field("certificate_chain", &self.certificate_chain.len())
            .field("private_key", &"<redacted>")
            .field("issuing_ca", &self.issuing_ca.len())
            .finish()
    }
}

/// Source of TLS material for proxies.
pub trait CertificateManager: Send + Sync {
    /// Issues (or returns a cached) certificate for `common_name`.
    fn issue_certificate(&self, common_name: &str, validity: Duration) -> Result<Certificate>;
}

/// Serves one pre-issued PEM bundle for every common name.
///
/// Reads `cert.pem`, `key.pem` and `ca.pem` from a directory; useful for
/// compiling offline against certificates issued elsewhere.
#[derive(Clone)]
pub struct PemBundle {
    dir: PathBuf,
    certificate_chain: Vec<u8>,
    private_key: Vec<u8>,
    issuing_ca: Vec<u8>,
}

impl fmt::Debug for PemBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PemBundle").field("dir", &self.dir).finish_non_exhaustive()
    }
}

fn read_pem(dir: &Path, file: &str) -> Result<Vec<u8>> {
    let path = dir.join(file);
    let pem = std::fs::read(&path)
        .map_err(|e| Error::config_with_source(format!("Failed to read {}", path.display()), Box::new(e)))?;
    if pem.is_empty() {
        return Err(Error::config(format!("{} is empty", path.display())));
    }
    Ok(pem)
}

impl PemBundle {
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            dir: dir.to_path_buf(),
            certificate_chain: read_pem(dir, CERT_CHAIN_FILE)?,
            private_key: read_pem(dir, PRIVATE_KEY_FILE)?,
            issuing_ca: read_pem(dir, ISSUING_CA_FILE)?,
        })
    }
}

impl CertificateManager for PemBundle {
    fn issue_certificate(&self, common_name: &str, _validity: Duration) -> Result<Certificate> {
        Ok(Certificate {
            common_name: common_name.to_string(),
            certificate_chain: self.certificate_chain.clone(),
            private_key: self.private_key.clone(),
            issuing_ca: self.issuing_ca.clone(),
        })
    }
}

fn inline_bytes(bytes: &[u8]) -> Option<DataSource> {
    Some(DataSource { specifier: Some(Specifier::InlineBytes(bytes.to_vec())), ..Default::default() })
}

fn validation_secret(name: String, cert: &Certificate) -> Secret {
    Secret {
        name,
        r#type: Some(secret::Type::ValidationContext(CertificateValidationContext {
            trusted_ca: inline_bytes(&cert.issuing_ca),
            ..Default::default()
        })),
    }
}

/// Secrets for `identity`: its service certificate plus the inbound and
/// outbound mTLS roots, and the ingress root when `ingress` is set.
pub fn service_secrets(identity: &ServiceIdentity, cert: &Certificate, ingress: bool) -> Vec<Secret> {
    let mut secrets = vec![
        Secret {
            name: service_cert_secret_name(identity),
            r#type: Some(secret::Type::TlsCertificate(TlsCertificate {
                certificate_chain: inline_bytes(&cert.certificate_chain),
                private_key: inline_bytes(&cert.private_key),
                ..Default::default()
            })),
        },
        validation_secret(inbound_root_cert_secret_name(identity), cert),
        validation_secret(outbound_root_cert_secret_name(identity), cert),
    ];
    if ingress {
        secrets.push(validation_secret(INGRESS_ROOT_CERT_SECRET_NAME.to_string(), cert));
    }
    debug!(proxy = %identity, common_name = %cert.common_name, count = secrets.len(), "Built TLS secrets");
    secrets
}

/// Issues the certificate of `identity` and builds its secrets.
pub fn issue_service_secrets(
    manager: &dyn CertificateManager,
    identity: &ServiceIdentity,
    trust_domain: &str,
    ingress: bool,
) -> Result<Vec<Secret>> {
    let common_name = identity.principal(trust_domain);
    let cert = manager.issue_certificate(common_name.as_str(), SERVICE_CERT_VALIDITY)?;
    Ok(service_secrets(identity, &cert, ingress))
}
