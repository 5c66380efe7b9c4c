//! Mutual TLS setup shared by the agent and the client
//!
//! A bundle is a root CA, an endpoint certificate and its private key, all
//! PEM encoded. The same bundle shape builds both sides: the server demands
//! and verifies a client certificate issued by the root, the client verifies
//! the server against the same root and presents its own certificate.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("{0} file not specified")]
    Incomplete(&'static str),

    #[error("cannot read {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("client verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Paths of the three PEM files making up a TLS bundle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    pub root_cert: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Parsed TLS material, ready to build a server or client configuration
pub struct TlsBundle {
    roots: Arc<RootCertStore>,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl TlsFiles {
    pub fn new(
        root_cert: impl Into<PathBuf>,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root_cert: Some(root_cert.into()),
            cert: Some(cert.into()),
            key: Some(key.into()),
        }
    }

    /// True when no file is given at all, meaning TLS is not configured
    pub fn is_empty(&self) -> bool {
        self.root_cert.is_none() && self.cert.is_none() && self.key.is_none()
    }

    /// Read and parse the bundle
    ///
    /// Returns `Ok(None)` when no file is given. If any file is given, all
    /// three must be given and readable.
    pub fn load(&self) -> Result<Option<TlsBundle>, TlsError> {
        if self.is_empty() {
            return Ok(None);
        }

        let root_cert = self
            .root_cert
            .as_deref()
            .ok_or(TlsError::Incomplete("CA certificate"))?;
        let cert = self
            .cert
            .as_deref()
            .ok_or(TlsError::Incomplete("certificate"))?;
        let key = self.key.as_deref().ok_or(TlsError::Incomplete("key"))?;

        let mut roots = RootCertStore::empty();
        for ca in read_certs(root_cert)? {
            roots.add(ca)?;
        }

        Ok(Some(TlsBundle {
            roots: Arc::new(roots),
            certs: read_certs(cert)?,
            key: read_key(key)?,
        }))
    }
}

impl TlsBundle {
    /// Server side: present our certificate, require and verify the client's
    pub fn server_config(&self) -> Result<Arc<rustls::ServerConfig>, TlsError> {
        let provider = provider();
        let verifier =
            WebPkiClientVerifier::builder_with_provider(self.roots.clone(), provider.clone())
                .build()?;

        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.certs.clone(), self.key.clone_key())?;

        Ok(Arc::new(config))
    }

    /// Client side: verify the server against the root, present our certificate
    pub fn client_config(&self) -> Result<Arc<rustls::ClientConfig>, TlsError> {
        let config = rustls::ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(self.roots.clone())
            .with_client_auth_cert(self.certs.clone(), self.key.clone_key())?;

        Ok(Arc::new(config))
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{
        BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
        KeyUsagePurpose,
    };
    use rustls::pki_types::ServerName;
    use rustls::{ClientConnection, ServerConnection};
    use std::io::Write;

    /// A throwaway CA plus a `localhost` server certificate and a client
    /// certificate, written as PEM into `dir`. Returns (server, client) files.
    fn test_pki(dir: &Path) -> (TlsFiles, TlsFiles) {
        let ca_key = KeyPair::generate().expect("ca key");
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
        ca_params.distinguished_name.push(DnType::CommonName, "rce test ca");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::DigitalSignature];
        let ca = ca_params.self_signed(&ca_key).expect("ca cert");

        let write = |file: &str, pem: String| {
            let path = dir.join(file);
            std::fs::write(&path, pem).expect("write pem");
            path
        };
        let leaf = |name: &str, usage: ExtendedKeyUsagePurpose| {
            let key = KeyPair::generate().expect("key");
            let mut params = CertificateParams::new(vec![name.to_string()]).expect("params");
            params.extended_key_usages = vec![usage];
            let cert = params.signed_by(&key, &ca, &ca_key).expect("sign");
            TlsFiles::new(
                dir.join("ca.crt"),
                write(&format!("{name}.crt"), cert.pem()),
                write(&format!("{name}.key"), key.serialize_pem()),
            )
        };

        let server = leaf("localhost", ExtendedKeyUsagePurpose::ServerAuth);
        let client = leaf("rce-client", ExtendedKeyUsagePurpose::ClientAuth);
        write("ca.crt", ca.pem());
        (server, client)
    }

    /// Shuttle records between the two ends until both finish the handshake
    fn handshake(
        client: &mut ClientConnection,
        server: &mut ServerConnection,
    ) -> Result<(), rustls::Error> {
        let mut wire = Vec::new();
        for _ in 0..10 {
            wire.clear();
            while client.wants_write() {
                client.write_tls(&mut wire).expect("client write");
            }
            let mut rd = &wire[..];
            while !rd.is_empty() {
                server.read_tls(&mut rd).expect("server read");
                server.process_new_packets()?;
            }

            wire.clear();
            while server.wants_write() {
                server.write_tls(&mut wire).expect("server write");
            }
            let mut rd = &wire[..];
            while !rd.is_empty() {
                client.read_tls(&mut rd).expect("client read");
                client.process_new_packets()?;
            }

            if !client.is_handshaking() && !server.is_handshaking() {
                return Ok(());
            }
        }
        panic!("handshake did not finish");
    }

    fn localhost() -> ServerName<'static> {
        ServerName::try_from("localhost").expect("server name")
    }

    #[test]
    fn test_mutual_handshake() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (server_files, client_files) = test_pki(dir.path());
        let server_bundle = server_files.load().expect("load").expect("bundle");
        let client_bundle = client_files.load().expect("load").expect("bundle");

        let mut server =
            ServerConnection::new(server_bundle.server_config().expect("server config"))
                .expect("server");
        let mut client =
            ClientConnection::new(client_bundle.client_config().expect("client config"), localhost())
                .expect("client");

        handshake(&mut client, &mut server).expect("handshake");
        let presented = server.peer_certificates().expect("client certificate");
        assert_eq!(presented.len(), 1);
    }

    #[test]
    fn test_server_demands_client_certificate() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (server_files, client_files) = test_pki(dir.path());
        let server_bundle = server_files.load().expect("load").expect("bundle");
        let client_bundle = client_files.load().expect("load").expect("bundle");

        let anonymous = rustls::ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .expect("versions")
            .with_root_certificates(client_bundle.roots.clone())
            .with_no_client_auth();

        let mut server =
            ServerConnection::new(server_bundle.server_config().expect("server config"))
                .expect("server");
        let mut client = ClientConnection::new(Arc::new(anonymous), localhost()).expect("client");

        assert!(handshake(&mut client, &mut server).is_err());
    }

    #[test]
    fn test_no_files_means_no_tls() {
        let files = TlsFiles::default();
        assert!(files.is_empty());
        assert!(files.load().expect("empty bundle is not an error").is_none());
    }

    #[test]
    fn test_partial_bundle_is_rejected() {
        let files = TlsFiles {
            root_cert: Some("/tmp/ca.crt".into()),
            cert: None,
            key: Some("/tmp/server.key".into()),
        };
        assert!(matches!(
            files.load(),
            Err(TlsError::Incomplete("certificate"))
        ));
    }

    #[test]
    fn test_missing_file_fails_fast() {
        let files = TlsFiles::new(
            "/nonexistent/ca.crt",
            "/nonexistent/server.crt",
            "/nonexistent/server.key",
        );
        match files.load() {
            Err(TlsError::Read { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/ca.crt"));
            }
            other => panic!("expected read error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_file_without_certificates() {
        let mut ca = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(ca, "not a certificate").expect("write");

        let files = TlsFiles::new(ca.path(), ca.path(), ca.path());
        assert!(matches!(files.load(), Err(TlsError::NoCertificates(_))));
    }
}
