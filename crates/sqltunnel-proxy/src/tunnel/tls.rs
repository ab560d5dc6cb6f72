//! Client TLS for instance channels.
//!
//! An instance certificate names the instance as `project:name`, which is
//! neither a DNS name nor an IP address, so the stock webpki name check
//! cannot be used. [`InstanceVerifier`] validates the chain against the
//! instance CA and then compares the certificate's Common Name and DNS
//! subject alternative names with the expected identity. SNI carries the
//! dialed host.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error, RootCertStore, SignatureScheme,
};
use tracing::warn;
use x509_parser::prelude::GeneralName;

use super::error::DialError;
use crate::source::TlsIdentity;

/// ALPN protocol id for HTTP/2.
const ALPN_H2: &[u8] = b"h2";

/// Verifies a server certificate against one CA and one instance identity.
#[derive(Debug)]
pub struct InstanceVerifier {
    roots: Arc<RootCertStore>,
    identity: String,
    provider: Arc<CryptoProvider>,
}

impl InstanceVerifier {
    pub fn new(
        roots: RootCertStore,
        identity: impl Into<String>,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            roots: Arc::new(roots),
            identity: identity.into(),
            provider,
        }
    }
}

impl ServerCertVerifier for InstanceVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )?;

        let presented = certificate_identities(end_entity)?;
        if presented.iter().any(|name| *name == self.identity) {
            return Ok(ServerCertVerified::assertion());
        }
        warn!(
            expected = %self.identity,
            presented = ?presented,
            "Server certificate names a different instance"
        );
        Err(Error::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        ))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Common Name values followed by DNS subject alternative names.
fn certificate_identities(der: &CertificateDer<'_>) -> Result<Vec<String>, Error> {
    let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
        .map_err(|_| Error::InvalidCertificate(CertificateError::BadEncoding))?;

    let mut names: Vec<String> = cert
        .subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .map(str::to_owned)
        .collect();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        names.extend(san.value.general_names.iter().filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some((*dns).to_owned()),
            _ => None,
        }));
    }
    Ok(names)
}

/// Build the rustls client config for one dial: trust only the instance CA,
/// expect `tls.server_name` as the server identity, present the client
/// identity if there is one, and offer HTTP/2 via ALPN.
pub fn client_config(tls: &TlsIdentity) -> Result<ClientConfig, DialError> {
    let identity = tls
        .server_name
        .as_deref()
        .ok_or_else(|| DialError::Tls("no server name to verify against".into()))?;

    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(tls.ca_cert_pem.as_bytes()) {
        let cert = cert.map_err(|e| DialError::Tls(format!("invalid CA certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| DialError::Tls(format!("unusable CA certificate: {e}")))?;
    }
    if roots.is_empty() {
        return Err(DialError::Tls("no CA certificate found".into()));
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = InstanceVerifier::new(roots, identity, Arc::clone(&provider));
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DialError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));

    let mut config = match &tls.client {
        Some(client) => {
            let chain = CertificateDer::pem_slice_iter(client.cert_pem.as_bytes())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| DialError::Tls(format!("invalid client certificate: {e}")))?;
            let key = PrivateKeyDer::from_pem_slice(client.key_pem.as_bytes())
                .map_err(|e| DialError::Tls(format!("invalid client key: {e}")))?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| DialError::Tls(format!("client identity rejected: {e}")))?
        }
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(config)
}

/// SNI for `address`: its host part, which must be a DNS name or an IP.
pub fn sni_for(address: &str) -> Result<ServerName<'static>, DialError> {
    let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(host.to_owned()).map_err(|e| DialError::Endpoint {
        address: address.to_owned(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rcgen::{
        BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer,
        KeyPair, KeyUsagePurpose,
    };

    use super::*;
    use crate::source::ClientIdentity;

    struct Ca {
        params: CertificateParams,
        key: KeyPair,
        pem: String,
    }

    fn ca(name: &str) -> Ca {
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        params.key_usages.push(KeyUsagePurpose::KeyCertSign);
        let key = KeyPair::generate().unwrap();
        let pem = params.self_signed(&key).unwrap().pem();
        Ca { params, key, pem }
    }

    struct Leaf {
        der: CertificateDer<'static>,
        cert_pem: String,
        key_pem: String,
    }

    /// Certificate signed by `ca` with `identity` as its Common Name.
    fn server_cert(ca: &Ca, identity: &str) -> Leaf {
        let issuer = Issuer::from_params(&ca.params, &ca.key);
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, identity);
        params
            .extended_key_usages
            .push(ExtendedKeyUsagePurpose::ServerAuth);
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &issuer).unwrap();
        Leaf {
            der: cert.der().clone(),
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }

    fn verifier(ca: &Ca, identity: &str) -> InstanceVerifier {
        let mut roots = RootCertStore::empty();
        for cert in CertificateDer::pem_slice_iter(ca.pem.as_bytes()) {
            roots.add(cert.unwrap()).unwrap();
        }
        InstanceVerifier::new(
            roots,
            identity,
            Arc::new(rustls::crypto::ring::default_provider()),
        )
    }

    fn verify(verifier: &InstanceVerifier, cert: &CertificateDer<'_>) -> Result<(), Error> {
        let sni = ServerName::try_from("127.0.0.1").unwrap();
        verifier
            .verify_server_cert(cert, &[], &sni, &[], UnixTime::now())
            .map(|_| ())
    }

    fn identity(ca_pem: &str, server_name: Option<&str>) -> TlsIdentity {
        TlsIdentity {
            ca_cert_pem: ca_pem.into(),
            client: None,
            server_name: server_name.map(Into::into),
        }
    }

    #[test]
    fn accepts_certificate_naming_the_instance() {
        let ca = ca("test CA");
        let leaf = server_cert(&ca, "proj:db");
        assert!(verify(&verifier(&ca, "proj:db"), &leaf.der).is_ok());
    }

    #[test]
    fn rejects_certificate_for_another_instance() {
        let ca = ca("test CA");
        let leaf = server_cert(&ca, "proj:other");
        let err = verify(&verifier(&ca, "proj:db"), &leaf.der).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
        );
    }

    #[test]
    fn rejects_certificate_from_another_ca() {
        let trusted = ca("trusted CA");
        let rogue = ca("rogue CA");
        let leaf = server_cert(&rogue, "proj:db");
        assert!(matches!(
            verify(&verifier(&trusted, "proj:db"), &leaf.der),
            Err(Error::InvalidCertificate(_))
        ));
    }

    #[test]
    fn reads_common_name() {
        let ca = ca("test CA");
        let leaf = server_cert(&ca, "proj:db");
        assert_eq!(certificate_identities(&leaf.der).unwrap(), vec!["proj:db"]);
    }

    #[test]
    fn client_config_offers_h2() {
        let ca = ca("test CA");
        let config = client_config(&identity(&ca.pem, Some("proj:db"))).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[test]
    fn client_config_requires_server_name() {
        let ca = ca("test CA");
        let err = client_config(&identity(&ca.pem, None)).unwrap_err();
        assert!(matches!(err, DialError::Tls(_)));
    }

    #[test]
    fn client_config_rejects_missing_ca() {
        let err = client_config(&identity("not a certificate", Some("proj:db"))).unwrap_err();
        assert!(matches!(err, DialError::Tls(ref msg) if msg.contains("no CA")));
    }

    #[test]
    fn client_config_loads_client_identity() {
        let ca = ca("test CA");
        let leaf = server_cert(&ca, "client");
        let mut tls = identity(&ca.pem, Some("proj:db"));
        tls.client = Some(ClientIdentity {
            cert_pem: leaf.cert_pem,
            key_pem: leaf.key_pem,
        });
        assert!(client_config(&tls).is_ok());
    }

    #[test]
    fn sni_uses_dialed_host() {
        assert_eq!(
            sni_for("10.0.0.1:3307").unwrap(),
            ServerName::try_from("10.0.0.1").unwrap()
        );
        assert_eq!(
            sni_for("db.internal:3307").unwrap(),
            ServerName::try_from("db.internal").unwrap()
        );
        assert_eq!(
            sni_for("[::1]:3307").unwrap(),
            ServerName::try_from("::1").unwrap()
        );
        assert!(matches!(
            sni_for("bad host:3307"),
            Err(DialError::Endpoint { .. })
        ));
    }
}
