//! Shared utilities for integration testing: generated certificates, raw
//! HTTP clients over plain and TLS transports, and a small echo handler
//! chain.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use harbor::handler::chain::{Handler, Request, Response};
use harbor::{AdmittedConnection, HandlerChain, HandlerFactory};

/// A generated certificate with its key, in every shape the tests need.
pub struct GeneratedCert {
    pub cert_pem: String,
    pub key_pem: String,
    pub der: CertificateDer<'static>,
    pub key_der: Vec<u8>,
}

/// Self-signed certificate for the given DNS names.
pub fn self_signed(sans: &[&str]) -> GeneratedCert {
    let generated = rcgen::generate_simple_self_signed(
        sans.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
    )
    .unwrap();
    GeneratedCert {
        cert_pem: generated.cert.pem(),
        key_pem: generated.key_pair.serialize_pem(),
        der: generated.cert.der().clone(),
        key_der: generated.key_pair.serialize_der(),
    }
}

/// A throwaway CA for client-certificate tests.
pub struct TestCa {
    pub cert_pem: String,
    pub der: CertificateDer<'static>,
    cert: rcgen::Certificate,
    key: rcgen::KeyPair,
}

pub fn test_ca() -> TestCa {
    let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "harbor test ca");
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    TestCa {
        cert_pem: cert.pem(),
        der: cert.der().clone(),
        cert,
        key,
    }
}

/// A client certificate with the given common name, signed by the CA.
pub fn client_cert(ca: &TestCa, common_name: &str) -> GeneratedCert {
    let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &ca.cert, &ca.key).unwrap();
    GeneratedCert {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
        der: cert.der().clone(),
        key_der: key.serialize_der(),
    }
}

/// SHA-256 digest of a DER certificate.
pub fn cert_digest(der: &[u8]) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    Sha256::digest(der).to_vec()
}

/// Client configuration trusting exactly the given certificates.
pub fn client_config(trusted: &[&CertificateDer<'static>]) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in trusted {
        roots.add((*cert).clone()).unwrap();
    }
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Client configuration presenting a client certificate.
pub fn client_config_with_identity(
    trusted: &[&CertificateDer<'static>],
    identity: &GeneratedCert,
) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in trusted {
        roots.add((*cert).clone()).unwrap();
    }
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.key_der.clone()));
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(vec![identity.der.clone()], key)
            .unwrap(),
    )
}

/// Connect with TLS. Returns the stream and whether the handshake resumed a
/// previous session.
pub async fn tls_connect(
    addr: SocketAddr,
    server_name: &str,
    config: Arc<ClientConfig>,
) -> std::io::Result<(TlsStream<TcpStream>, bool)> {
    let connector = TlsConnector::from(config);
    let tcp = TcpStream::connect(addr).await?;
    let name = ServerName::try_from(server_name.to_string()).unwrap();
    let tls = connector.connect(name, tcp).await?;
    let resumed = matches!(
        tls.get_ref().1.handshake_kind(),
        Some(rustls::HandshakeKind::Resumed)
    );
    Ok((tls, resumed))
}

/// The server certificate presented on a TLS client stream.
pub fn peer_certificate(stream: &TlsStream<TcpStream>) -> CertificateDer<'static> {
    stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first().cloned())
        .expect("server presented no certificate")
}

/// A minimal parsed HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Issue a GET over an established transport and read the response.
pub async fn http_get<S>(stream: &mut S, host: &str, path: &str) -> std::io::Result<HttpResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    read_response(stream).await
}

/// Plaintext GET against an address.
pub async fn plain_get(addr: SocketAddr, path: &str) -> std::io::Result<HttpResponse> {
    let mut stream = TcpStream::connect(addr).await?;
    http_get(&mut stream, "localhost", path).await
}

/// TLS GET against an address, trusting the given certificates.
pub async fn tls_get(
    addr: SocketAddr,
    server_name: &str,
    config: Arc<ClientConfig>,
    path: &str,
) -> std::io::Result<HttpResponse> {
    let (mut stream, _) = tls_connect(addr, server_name, config).await?;
    http_get(&mut stream, server_name, path).await
}

async fn read_response<S>(stream: &mut S) -> std::io::Result<HttpResponse>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before response headers",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed status line")
        })?;

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect();

    let content_length: usize = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Terminal handler answering 200 with the peer certificate's common name
/// echoed in `x-client-cn`.
pub struct EchoFactory;

struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, conn: &AdmittedConnection, _req: Request) -> Response {
        let cn = conn.peer_common_name().unwrap_or_default();
        let mut response = http::Response::new(Full::new(Bytes::from_static(b"hello")));
        response
            .headers_mut()
            .insert("x-client-cn", cn.parse().unwrap_or_else(|_| "".parse().unwrap()));
        response
    }
}

impl HandlerFactory for EchoFactory {
    fn wrap(&self, _next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(EchoHandler)
    }
}

/// A chain with only the echo handler.
pub fn echo_chain() -> HandlerChain {
    HandlerChain::builder().add(Arc::new(EchoFactory)).build()
}
