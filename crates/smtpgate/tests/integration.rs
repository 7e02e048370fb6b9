//! End-to-end tests over loopback TCP.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustls::DigitallySignedStruct;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use smtpgate::{
    AuthMode, ConfigBuilder, Context, Handler, HookResult, ProtocolError, Server, TlsMode,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Delivered {
    from: String,
    to: Vec<String>,
    data: Vec<u8>,
}

#[derive(Default)]
struct Mailbox {
    delivered: Mutex<Vec<Delivered>>,
}

impl Handler for Mailbox {
    async fn on_auth(
        &self,
        _ctx: &mut Context,
        _authorization_id: &str,
        authentication_id: &str,
        secret: &str,
    ) -> HookResult<Option<String>> {
        if authentication_id == "user" && secret == "secret" {
            Ok(None)
        } else {
            Err(ProtocolError::CredentialsInvalid.into())
        }
    }

    async fn on_message_data(&self, ctx: &mut Context) -> HookResult<()> {
        self.delivered.lock().unwrap().push(Delivered {
            from: ctx.envelope.from.clone(),
            to: ctx.envelope.to.clone(),
            data: ctx.message.data.clone(),
        });
        Ok(())
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start(builder: ConfigBuilder) -> (Server<Mailbox>, SocketAddr) {
    init_logging();
    let config = builder.hosts("127.0.0.1").ports("0").build().unwrap();
    let mut server = Server::with_shared_handler(config, Arc::new(Mailbox::default()));
    server.start().await.unwrap();
    let addr = server.local_addrs()[0];
    (server, addr)
}

struct Client<S> {
    stream: BufReader<S>,
}

impl Client<TcpStream> {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: BufReader::new(TcpStream::connect(addr).await.unwrap()),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Reads one complete (possibly multi-line) reply.
    async fn reply(&mut self) -> String {
        let mut reply = String::new();
        loop {
            let mut line = String::new();
            let read = self.stream.read_line(&mut line).await.unwrap();
            assert!(read > 0, "connection closed after {reply:?}");
            reply.push_str(&line);
            if line.as_bytes().get(3) != Some(&b'-') {
                return reply;
            }
        }
    }

    async fn reply_within(&mut self, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, self.reply()).await.ok()
    }

    async fn write(&mut self, bytes: &[u8]) {
        self.stream.get_mut().write_all(bytes).await.unwrap();
    }

    async fn command(&mut self, line: &str) -> String {
        self.write(format!("{line}\r\n").as_bytes()).await;
        self.reply().await
    }

    async fn closed(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.stream.read_line(&mut line)).await,
            Ok(Ok(0) | Err(_))
        )
    }
}

#[tokio::test]
async fn test_end_to_end_dialog() {
    let (mut server, addr) = start(ConfigBuilder::new()).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.reply().await, "220 127.0.0.1 says welcome!\r\n");
    let ehlo = client.command("EHLO test").await;
    assert!(ehlo.starts_with("250-127.0.0.1 at your service!\r\n"));
    assert!(ehlo.ends_with("250 OK\r\n"));

    assert_eq!(client.command("MAIL FROM:<a@b>").await, "250 OK\r\n");
    assert_eq!(client.command("RCPT TO:<c@d>").await, "250 OK\r\n");
    assert_eq!(client.command("RCPT TO:<e@f>").await, "250 OK\r\n");
    assert!(client.command("DATA").await.starts_with("354 "));
    client
        .write(b"Subject: test\r\n\r\nHello\r\n..dotted\r\n.\r\n")
        .await;
    assert_eq!(
        client.reply().await,
        "250 Requested mail action okay, completed\r\n"
    );
    assert_eq!(
        client.command("QUIT").await,
        "221 Service closing transmission channel\r\n"
    );
    assert!(client.closed().await);

    let delivered = server.handler().delivered.lock().unwrap().clone();
    assert_eq!(
        delivered,
        vec![Delivered {
            from: "<a@b>".to_string(),
            to: vec!["<c@d>".to_string(), "<e@f>".to_string()],
            data: b"Subject: test\r\n\r\nHello\r\n.dotted".to_vec(),
        }]
    );

    server.stop(Duration::from_secs(1), true).await;
    assert!(server.is_stopped());
}

#[tokio::test]
async fn test_out_of_order_commands() {
    let (mut server, addr) = start(ConfigBuilder::new()).await;
    let mut client = Client::connect(addr).await;
    client.reply().await;

    assert_eq!(
        client.command("MAIL FROM:<a@b>").await,
        "503 Bad sequence of commands\r\n"
    );
    client.command("HELO test").await;
    assert_eq!(
        client.command("DATA").await,
        "503 Bad sequence of commands\r\n"
    );
    assert_eq!(client.command("RSET").await, "250 OK\r\n");
    assert_eq!(client.command("RSET").await, "250 OK\r\n");
    server.stop(Duration::from_millis(100), false).await;
}

#[tokio::test]
async fn test_pipelined_commands() {
    let (mut server, addr) = start(ConfigBuilder::new().pipelining(true)).await;
    let mut client = Client::connect(addr).await;
    client.reply().await;
    client.command("EHLO test").await;

    client
        .write(b"MAIL FROM:<a@b>\r\nRCPT TO:<c@d>\r\nDATA\r\n")
        .await;
    assert_eq!(client.reply().await, "250 OK\r\n");
    assert_eq!(client.reply().await, "250 OK\r\n");
    assert!(client.reply().await.starts_with("354 "));
    client.write(b"body\r\n.\r\nQUIT\r\n").await;
    assert!(client.reply().await.starts_with("250 "));
    assert!(client.reply().await.starts_with("221 "));
    server.stop(Duration::from_millis(100), true).await;
}

#[tokio::test]
async fn test_pipelining_refused_when_disabled() {
    let (mut server, addr) = start(ConfigBuilder::new()).await;
    let mut client = Client::connect(addr).await;
    client.reply().await;

    client.write(b"NOOP\r\nNOOP\r\n").await;
    assert_eq!(
        client.reply().await,
        "500 Bad input, PIPELINING is not allowed\r\n"
    );
    assert_eq!(client.reply().await, "250 OK\r\n");
    server.stop(Duration::from_millis(100), false).await;
}

#[tokio::test]
async fn test_governor_delays_and_refuses() {
    let (mut server, addr) = start(
        ConfigBuilder::new()
            .max_processings(1)
            .max_connections(Some(2)),
    )
    .await;

    let mut first = Client::connect(addr).await;
    assert!(first.reply().await.starts_with("220 "));

    let mut second = Client::connect(addr).await;
    for _ in 0..100 {
        if server.connections() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.connections(), 2);
    assert_eq!(server.processings(), 1);
    assert!(
        second
            .reply_within(Duration::from_millis(200))
            .await
            .is_none()
    );

    let mut third = Client::connect(addr).await;
    assert_eq!(
        third.reply_within(Duration::from_secs(2)).await.unwrap(),
        "421 Service too busy or not available, closing transmission channel\r\n"
    );
    assert!(third.closed().await);

    first.command("QUIT").await;
    let greeting = second.reply_within(Duration::from_secs(2)).await.unwrap();
    assert!(greeting.starts_with("220 "));

    second.command("QUIT").await;
    server.stop(Duration::from_secs(1), true).await;
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn test_buffer_overrun_closes_with_421() {
    let (mut server, addr) = start(
        ConfigBuilder::new()
            .io_buffer_chunk_size(16)
            .io_buffer_max_size(Some(64)),
    )
    .await;
    let mut client = Client::connect(addr).await;
    client.reply().await;

    client.write(&[b'x'; 80]).await;
    assert!(client.reply().await.starts_with("421 "));
    assert!(client.closed().await);
    server.stop(Duration::from_millis(100), false).await;
}

#[tokio::test]
async fn test_idle_timeout_closes_with_421() {
    let (mut server, addr) = start(
        ConfigBuilder::new().io_cmd_timeout(Some(Duration::from_millis(200))),
    )
    .await;
    let mut client = Client::connect(addr).await;
    client.reply().await;

    let reply = client.reply_within(Duration::from_secs(2)).await.unwrap();
    assert!(reply.starts_with("421 "));
    assert!(client.closed().await);
    server.stop(Duration::from_millis(100), false).await;
}

#[tokio::test]
async fn test_forced_stop_aborts_idle_sessions() {
    let (mut server, addr) = start(ConfigBuilder::new()).await;
    let mut client = Client::connect(addr).await;
    client.reply().await;
    assert_eq!(server.connections(), 1);

    server.stop(Duration::from_millis(100), false).await;
    assert!(server.is_shutdown());
    assert!(server.is_stopped());
    assert_eq!(server.connections(), 0);
    assert!(client.reply().await.starts_with("421 "));
    assert!(client.closed().await);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[derive(Debug)]
struct NoCertificateVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn tls_connector() -> TlsConnector {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertificateVerification(provider)))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[tokio::test]
async fn test_starttls_upgrade() {
    let (mut server, addr) = start(
        ConfigBuilder::new()
            .tls_mode(TlsMode::Required)
            .auth_mode(AuthMode::Optional),
    )
    .await;
    assert_eq!(server.tls_common_name(), Some("localhost.local"));

    let mut client = Client::connect(addr).await;
    client.reply().await;
    assert!(client.command("EHLO test").await.contains("250-STARTTLS\r\n"));
    assert_eq!(
        client.command("MAIL FROM:<a@b>").await,
        "530 Encryption required, must issue STARTTLS command first\r\n"
    );
    assert_eq!(client.command("STARTTLS").await, "220 Ready to start TLS\r\n");

    let tcp = client.stream.into_inner();
    let tls = tls_connector()
        .connect(ServerName::try_from("localhost.local").unwrap(), tcp)
        .await
        .unwrap();
    let mut client = Client {
        stream: BufReader::new(tls),
    };

    assert_eq!(
        client.command("MAIL FROM:<a@b>").await,
        "503 Bad sequence of commands\r\n"
    );
    let ehlo = client.command("EHLO test").await;
    assert!(!ehlo.contains("STARTTLS"));
    assert!(ehlo.contains("250-AUTH LOGIN PLAIN\r\n"));
    assert_eq!(
        client.command("STARTTLS").await,
        "503 Bad sequence of commands\r\n"
    );

    assert_eq!(client.command("AUTH LOGIN").await, "334 VXNlcm5hbWU6\r\n");
    assert_eq!(client.command("dXNlcg==").await, "334 UGFzc3dvcmQ6\r\n");
    assert_eq!(client.command("c2VjcmV0").await, "235 OK\r\n");

    assert_eq!(client.command("MAIL FROM:<a@b>").await, "250 OK\r\n");
    assert_eq!(client.command("RCPT TO:<c@d>").await, "250 OK\r\n");
    assert!(client.command("DATA").await.starts_with("354 "));
    assert!(client.command("secret body\r\n.").await.starts_with("250 "));
    assert!(client.command("QUIT").await.starts_with("221 "));

    let delivered = server.handler().delivered.lock().unwrap().clone();
    assert_eq!(delivered[0].data, b"secret body");
    server.stop(Duration::from_secs(1), true).await;
}

#[tokio::test]
async fn test_shutdown_refuses_new_clients() {
    let (mut server, addr) = start(ConfigBuilder::new()).await;
    server.shutdown();
    server.join().await;
    assert!(server.is_stopped());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_shutdown_closes_idle_sessions() {
    let (mut server, addr) = start(ConfigBuilder::new()).await;
    let mut client = Client::connect(addr).await;
    client.reply().await;
    client.command("EHLO test").await;

    server.shutdown();
    assert_eq!(
        client.reply_within(Duration::from_secs(2)).await.unwrap(),
        "221 Service closing transmission channel\r\n"
    );
    assert!(client.closed().await);
    tokio::time::timeout(Duration::from_secs(2), server.join())
        .await
        .unwrap();
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn test_graceful_stop_closes_with_221() {
    let (mut server, addr) = start(ConfigBuilder::new()).await;
    let mut client = Client::connect(addr).await;
    client.reply().await;

    server.stop(Duration::from_secs(5), true).await;
    assert!(server.is_stopped());
    assert_eq!(
        client.reply().await,
        "221 Service closing transmission channel\r\n"
    );
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_shutdown_lets_message_complete() {
    let (mut server, addr) = start(ConfigBuilder::new()).await;
    let mut client = Client::connect(addr).await;
    client.reply().await;
    client.command("EHLO test").await;
    client.command("MAIL FROM:<a@b>").await;
    client.command("RCPT TO:<c@d>").await;
    assert!(client.command("DATA").await.starts_with("354 "));

    server.shutdown();
    assert!(
        client
            .reply_within(Duration::from_millis(200))
            .await
            .is_none()
    );
    client.write(b"late body\r\n.\r\n").await;
    assert!(client.reply().await.starts_with("250 "));
    assert!(client.reply().await.starts_with("221 "));
    assert!(client.closed().await);

    let delivered = server.handler().delivered.lock().unwrap().clone();
    assert_eq!(delivered[0].data, b"late body");
    server.join().await;
}

#[tokio::test]
async fn test_stalled_tls_handshake_times_out() {
    let (mut server, addr) = start(
        ConfigBuilder::new()
            .tls_mode(TlsMode::Optional)
            .io_cmd_timeout(Some(Duration::from_millis(300))),
    )
    .await;
    let mut client = Client::connect(addr).await;
    client.reply().await;
    client.command("EHLO test").await;
    assert_eq!(client.command("STARTTLS").await, "220 Ready to start TLS\r\n");

    assert!(client.closed().await);
    for _ in 0..100 {
        if server.connections() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.connections(), 0);
    assert_eq!(server.processings(), 0);
    server.stop(Duration::from_millis(100), false).await;
}
