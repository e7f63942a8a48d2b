//! TLS compatibility context for legacy government endpoints.
//!
//! Some open-data portals are reached with the OpenSSL cipher string
//! `HIGH:!DH:!aNULL` and present certificate chains that strict validation
//! rejects. The context built here is used only for hosts listed in
//! `tls_compat_hosts`; every other host goes through the standard client.
//!
//! The cipher list is the rustls subset of that string, not an equivalent of
//! it. rustls ships only AEAD suites (ECDHE with AES-GCM or ChaCha20-Poly1305,
//! and the TLS 1.3 suites), so the DH and anonymous filter removes nothing in
//! practice. The CBC, static-RSA and CAMELLIA/ARIA suites that OpenSSL's
//! `HIGH` also admits are unavailable. A server that only offers those fails
//! the handshake with a `Tls` fetch error; the compatibility context relaxes
//! certificate checking, not the cipher floor.
//!
//! RESIDUAL RISK: the compatibility context does not authenticate the server.
//! Certificate chain and hostname are not verified, so a network attacker can
//! impersonate a listed host. Only list hosts whose downloads are public data
//! and whose content is not trusted beyond that.

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName, SupportedCipherSuite};
use std::sync::Arc;
use std::time::SystemTime;

/// The rustls cipher suites admitted by `HIGH:!DH:!aNULL`.
///
/// Every suite rustls ships is an AEAD suite inside `HIGH`, so this is the
/// full rustls list; the name filter only guards against finite-field DH or
/// anonymous suites appearing in a later rustls release.
pub fn compat_cipher_suites() -> Vec<SupportedCipherSuite> {
    rustls::ALL_CIPHER_SUITES
        .iter()
        .copied()
        .filter(|suite| is_high_without_dh(&format!("{:?}", suite.suite())))
        .collect()
}

fn is_high_without_dh(name: &str) -> bool {
    let name = name.to_ascii_uppercase();
    !name.contains("_DHE_")
        && !name.contains("_DH_")
        && !name.contains("ANON")
        && !name.contains("NULL")
        && !name.contains("EXPORT")
}

/// Builds the relaxed client configuration for compatibility mode.
pub fn compat_client_config() -> Result<ClientConfig, rustls::Error> {
    let config = ClientConfig::builder()
        .with_cipher_suites(&compat_cipher_suites())
        .with_safe_default_kx_groups()
        .with_safe_default_protocol_versions()?
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    Ok(config)
}

/// Accepts any server certificate. See the module docs for the risk this carries.
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
