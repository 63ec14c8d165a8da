//! Mutual-TLS tests against a live listener
//!
//! Each test issues a CA, a `localhost` server certificate and client
//! certificates with `rcgen`, starts a [`Server`] on an ephemeral port and
//! talks HTTP/1.1 to it over `tokio-rustls`.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ProtocolVersion, RootCertStore};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use certgate::config::{
    ClientVerification, Config, IdentityMatchConfig, IdentityRuleConfig, RuleAction,
};
use certgate::realm::IdentityRealm;
use certgate::server::Server;
use certgate::tls::{
    CertificateAuthority, Subject, TlsContextBuilder, load_certs, load_private_key,
};
use certgate::{Error, build_site};

// ── fixtures ────────────────────────────────────────────────────────────────

struct Pki {
    dir: TempDir,
    ca: CertificateAuthority,
}

impl Pki {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let ca = CertificateAuthority::generate("Test Root CA", 30).unwrap();
        ca.pem().save(dir.path(), "ca").unwrap();

        let pki = Self { dir, ca };
        pki.issue("server", "localhost", vec!["localhost".to_string()]);
        pki.issue("alice", "alice", vec![]);
        pki.issue("mallory", "mallory", vec![]);
        pki
    }

    fn issue(&self, stem: &str, cn: &str, dns_names: Vec<String>) {
        let subject = Subject {
            dns_names,
            validity_days: 30,
            ..Subject::new(cn)
        };
        let leaf = self.ca.issue(&subject).unwrap();
        leaf.save(self.dir.path(), stem).unwrap();
    }

    fn path(&self, file: &str) -> std::path::PathBuf {
        self.dir.path().join(file)
    }

    fn config(&self, verification: ClientVerification) -> Config {
        let mut config = Config::default();
        config.tls.certificate_file = Some(self.path("server.crt"));
        config.tls.private_key_file = Some(self.path("server.key"));
        config.tls.ca_file = Some(self.path("ca.crt"));
        config.tls.client_verification = verification;
        config.portal.rules = vec![IdentityRuleConfig {
            match_criteria: IdentityMatchConfig {
                cn: Some("alice".to_string()),
                ..IdentityMatchConfig::default()
            },
            action: RuleAction::Allow,
        }];
        config
    }

    fn client_identity(&self, stem: &str) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (
            load_certs(&self.path(&format!("{stem}.crt"))).unwrap(),
            load_private_key(&self.path(&format!("{stem}.key"))).unwrap(),
        )
    }

    fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(&self.path("ca.crt")).unwrap() {
            roots.add(cert).unwrap();
        }
        roots
    }
}

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn tls_server(config: &Config) -> Server {
    let context = TlsContextBuilder::from_config(&config.tls)
        .get_context()
        .unwrap();
    Server::new(build_site(config, Arc::new(IdentityRealm))).with_tls(context)
}

async fn start(config: &Config) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(tls_server(config).run(listener, shutdown.clone()));

    Running { addr, shutdown }
}

fn client_config(
    roots: RootCertStore,
    identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    versions: &[&'static rustls::SupportedProtocolVersion],
) -> Arc<ClientConfig> {
    let builder = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_protocol_versions(versions)
        .unwrap()
        .with_root_certificates(roots);
    let config = match identity {
        Some((chain, key)) => builder.with_client_auth_cert(chain, key).unwrap(),
        None => builder.with_no_client_auth(),
    };
    Arc::new(config)
}

/// Raw HTTP/1.1 GET. Returns `None` when the handshake fails, otherwise
/// whatever the server sent before closing.
async fn get(addr: SocketAddr, config: Arc<ClientConfig>, path: &str) -> Option<(ProtocolVersion, String)> {
    let tcp = TcpStream::connect(addr).await.unwrap();
    let mut stream = TlsConnector::from(config)
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .ok()?;
    let version = stream.get_ref().1.protocol_version()?;

    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    if stream.write_all(request.as_bytes()).await.is_err() {
        return Some((version, String::new()));
    }

    let mut buf = Vec::new();
    // A rejected client certificate surfaces as an alert on the first read.
    let _ = stream.read_to_end(&mut buf).await;
    Some((version, String::from_utf8_lossy(&buf).into_owned()))
}

fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or("")
}

fn body(response: &str) -> &str {
    response.split_once("\r\n\r\n").map_or("", |(_, b)| b)
}

fn tls13() -> [&'static rustls::SupportedProtocolVersion; 1] {
    [&rustls::version::TLS13]
}

// ── context construction ────────────────────────────────────────────────────

/// Only one of key and certificate configured
#[test]
fn test_context_requires_key_and_certificate_together() {
    let pki = Pki::new();

    let result = TlsContextBuilder::new()
        .certificate_file(pki.path("server.crt"))
        .get_context();

    assert!(matches!(result, Err(Error::Config(_))));
}

/// Key from another certificate
#[test]
fn test_context_rejects_mismatched_key() {
    let pki = Pki::new();

    let result = TlsContextBuilder::new()
        .certificate_file(pki.path("server.crt"))
        .private_key_file(pki.path("alice.key"))
        .get_context();

    assert!(matches!(result, Err(Error::CertificateMismatch { .. })));
}

/// The context is built once and shared afterwards
#[test]
fn test_context_is_cached() {
    let pki = Pki::new();
    let builder = TlsContextBuilder::from_config(&pki.config(ClientVerification::TrustedCa).tls);

    let first = builder.get_context().unwrap();
    let second = builder.get_context().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
}

/// Missing files are reported as configuration errors
#[test]
fn test_context_reports_unreadable_files() {
    let result = TlsContextBuilder::new()
        .certificate_file(Path::new("/nonexistent/server.crt"))
        .private_key_file(Path::new("/nonexistent/server.key"))
        .get_context();

    assert!(matches!(result, Err(Error::Config(_))));
}

// ── handshakes ──────────────────────────────────────────────────────────────

/// Allowed client certificate reaches its avatar
#[tokio::test]
async fn test_trusted_client_certificate_is_served() {
    let pki = Pki::new();
    let server = start(&pki.config(ClientVerification::TrustedCa)).await;
    let config = client_config(pki.roots(), Some(pki.client_identity("alice")), &tls13());

    let (_, response) = get(server.addr, config, "/whoami").await.unwrap();

    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    let json: serde_json::Value = serde_json::from_str(body(&response)).unwrap();
    assert_eq!(json["anonymous"], false);
    assert_eq!(json["certificate"]["common_name"], "alice");
}

/// Certificate valid for TLS but refused by the portal
#[tokio::test]
async fn test_refused_identity_gets_401() {
    let pki = Pki::new();
    let server = start(&pki.config(ClientVerification::TrustedCa)).await;
    let config = client_config(pki.roots(), Some(pki.client_identity("mallory")), &tls13());

    let (_, response) = get(server.addr, config, "/").await.unwrap();

    assert_eq!(status_line(&response), "HTTP/1.1 401 Unauthorized");
    assert_eq!(body(&response), "Unauthorized");
}

/// No client certificate while one is required
#[tokio::test]
async fn test_missing_client_certificate_is_rejected() {
    let pki = Pki::new();
    let server = start(&pki.config(ClientVerification::TrustedCa)).await;
    let config = client_config(pki.roots(), None, &tls13());

    let outcome = get(server.addr, config, "/").await;

    if let Some((_, response)) = outcome {
        assert_eq!(response, "");
    }
}

/// Client certificate from an unknown CA
#[tokio::test]
async fn test_untrusted_client_certificate_is_rejected() {
    let pki = Pki::new();
    let other = Pki::new();
    let server = start(&pki.config(ClientVerification::TrustedCa)).await;
    let config = client_config(pki.roots(), Some(other.client_identity("alice")), &tls13());

    let outcome = get(server.addr, config, "/").await;

    if let Some((_, response)) = outcome {
        assert_eq!(response, "");
    }
}

/// `accept_any` hands certificates from unknown CAs to the portal
#[tokio::test]
async fn test_accept_any_defers_to_portal() {
    let pki = Pki::new();
    let other = Pki::new();
    let server = start(&pki.config(ClientVerification::AcceptAny)).await;
    let config = client_config(pki.roots(), Some(other.client_identity("alice")), &tls13());

    let (_, response) = get(server.addr, config, "/").await.unwrap();

    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    assert_eq!(body(&response), "Hello, alice\n");
}

/// Without client verification every client is anonymous
#[tokio::test]
async fn test_no_client_verification_is_anonymous() {
    let pki = Pki::new();
    let mut config = pki.config(ClientVerification::None);
    config.portal.allow_anonymous = true;
    let server = start(&config).await;
    let client = client_config(pki.roots(), None, &tls13());

    let (_, response) = get(server.addr, client, "/whoami").await.unwrap();

    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    let json: serde_json::Value = serde_json::from_str(body(&response)).unwrap();
    assert_eq!(json["anonymous"], true);
}

/// Anonymous access refused when not enabled
#[tokio::test]
async fn test_anonymous_refused_by_default() {
    let pki = Pki::new();
    let server = start(&pki.config(ClientVerification::None)).await;
    let client = client_config(pki.roots(), None, &tls13());

    let (_, response) = get(server.addr, client, "/").await.unwrap();

    assert_eq!(status_line(&response), "HTTP/1.1 401 Unauthorized");
}

/// TLS 1.2 clients are still served
#[tokio::test]
async fn test_tls12_client_is_served() {
    let pki = Pki::new();
    let server = start(&pki.config(ClientVerification::TrustedCa)).await;
    let config = client_config(
        pki.roots(),
        Some(pki.client_identity("alice")),
        &[&rustls::version::TLS12],
    );

    let (version, response) = get(server.addr, config, "/").await.unwrap();

    assert_eq!(version, ProtocolVersion::TLSv1_2);
    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
}

/// A client that never starts the handshake is disconnected
#[tokio::test]
async fn test_stalled_handshake_is_dropped() {
    let pki = Pki::new();
    let server = tls_server(&pki.config(ClientVerification::TrustedCa))
        .handshake_timeout(Duration::from_millis(200));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(listener, shutdown.clone()));

    let mut stalled = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), stalled.read(&mut buf))
        .await
        .expect("server kept the stalled connection open");

    assert!(matches!(read, Ok(0) | Err(_)));
    shutdown.cancel();
}

/// Shutdown does not wait for a handshake that never finishes
#[tokio::test]
async fn test_shutdown_abandons_pending_handshake() {
    let pki = Pki::new();
    let server = tls_server(&pki.config(ClientVerification::TrustedCa))
        .handshake_timeout(Duration::from_secs(60))
        .shutdown_timeout(Duration::from_secs(60));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(server.run(listener, shutdown.clone()));

    let _stalled = TcpStream::connect(addr).await.unwrap();
    // Let the accept loop hand the connection to its task.
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    let finished = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("server waited on the pending handshake");
    assert!(finished.unwrap().is_ok());
}
