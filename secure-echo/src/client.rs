//! Client composition.
//!
//! [`compose_client_options`] turns a [`ClientConfiguration`] into an
//! ordered list of [`ClientOption`]s mirroring the server's trust model.
//! [`RpcConnection`] applies them to a rustls-backed `reqwest` client. The
//! same connection type backs the interactive client and the gateway's
//! internal hop.

use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Identity};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::certs::CredentialPair;
use crate::config::{ClientConfiguration, ClientCredential, TrustMode, CLIENT_TIMEOUT};
use crate::error::{EchoError, Result};
use crate::rpc::{EchoMethod, RpcCode, RpcStatus};
use crate::types::{EchoRequest, EchoResponse, Empty, HealthResponse, PingResponse, RpcErrorBody};

pub const USER_AGENT: &str = concat!("echo-client/", env!("CARGO_PKG_VERSION"));

const RETRY_BASE_MS: u64 = 50;
const RETRY_MAX_MS: u64 = 1000;

/// One connection setting
#[derive(Debug, Clone)]
pub enum ClientOption {
    /// Retry calls that fail to connect until the timeout elapses
    WaitForReady,
    Timeout(Duration),
    Compression,
    UserAgent(String),
    /// Host name used for TLS verification instead of the endpoint's
    ServerNameOverride(String),
    Tls(TrustMode),
    AuthToken(String),
    AuthCertificate(CredentialPair),
}

/// Builds the option set for a client connection.
///
/// Certificate credentials without TLS are a configuration error; they are
/// never silently dropped in favour of an unauthenticated channel.
pub fn compose_client_options(config: &ClientConfiguration) -> Result<Vec<ClientOption>> {
    let mut options = Vec::new();

    if config.wait_for_ready {
        options.push(ClientOption::WaitForReady);
    }
    options.push(ClientOption::Timeout(config.timeout));
    if config.compression {
        options.push(ClientOption::Compression);
    }
    options.push(ClientOption::UserAgent(USER_AGENT.to_string()));

    if let Some(name) = &config.server_name_override {
        options.push(ClientOption::ServerNameOverride(name.clone()));
    }

    if let Some(trust) = &config.tls {
        tracing::info!("TLS enabled");
        if matches!(trust, TrustMode::InsecureSkipVerify) {
            tracing::warn!("server certificate verification is disabled, use only for testing");
        }
        options.push(ClientOption::Tls(trust.clone()));
    }

    match &config.credential {
        Some(ClientCredential::Token(token)) => {
            tracing::info!("authenticating with token");
            options.push(ClientOption::AuthToken(token.clone()));
        }
        Some(ClientCredential::Certificate(pair)) => {
            if config.tls.is_none() {
                return Err(EchoError::config(
                    "client certificates can only be used with TLS connections",
                ));
            }
            tracing::info!("authenticating with client certificate");
            options.push(ClientOption::AuthCertificate(pair.clone()));
        }
        None => {}
    }

    Ok(options)
}

/// The RPC surface of the echo service
#[allow(async_fn_in_trait)]
pub trait EchoApi {
    async fn ping(&self) -> Result<PingResponse>;
    async fn health(&self) -> Result<HealthResponse>;
    async fn request(&self, value: &str) -> Result<EchoResponse>;
    async fn faulty(&self) -> Result<Empty>;
    async fn slow(&self) -> Result<Empty>;
}

/// A configured channel to one RPC endpoint
#[derive(Clone)]
pub struct RpcConnection {
    http: Client,
    base_url: String,
    authorization: Option<String>,
    timeout: Duration,
    wait_for_ready: bool,
}

impl RpcConnection {
    /// Applies the options without touching the network.
    pub fn build(endpoint: &str, options: &[ClientOption]) -> Result<Self> {
        let mut builder = Client::builder().use_rustls_tls();
        let mut scheme = "http";
        let mut server_name = None;
        let mut authorization = None;
        let mut timeout = CLIENT_TIMEOUT;
        let mut wait_for_ready = false;
        let mut compression = false;

        for option in options {
            match option {
                ClientOption::WaitForReady => wait_for_ready = true,
                ClientOption::Timeout(t) => {
                    timeout = *t;
                    builder = builder.timeout(*t).connect_timeout(*t);
                }
                ClientOption::Compression => compression = true,
                ClientOption::UserAgent(agent) => builder = builder.user_agent(agent.as_str()),
                ClientOption::ServerNameOverride(name) => server_name = Some(name.clone()),
                ClientOption::Tls(trust) => {
                    scheme = "https";
                    builder = match trust {
                        TrustMode::SystemCa => builder.tls_built_in_root_certs(true),
                        TrustMode::CustomCa(pem) => {
                            let ca = reqwest::Certificate::from_pem(pem).map_err(|e| {
                                EchoError::config(format!("invalid CA certificate: {}", e))
                            })?;
                            builder.add_root_certificate(ca)
                        }
                        TrustMode::InsecureSkipVerify => builder.danger_accept_invalid_certs(true),
                    };
                }
                ClientOption::AuthToken(token) => authorization = Some(format!("Bearer {}", token)),
                ClientOption::AuthCertificate(pair) => builder = builder.identity(identity(pair)?),
            }
        }

        // reqwest advertises gzip whenever the feature is compiled in
        builder = if compression {
            builder.gzip(true)
        } else {
            builder.no_gzip()
        };

        let authority = match server_name {
            Some(name) => {
                let addr = resolve_endpoint(endpoint)?;
                builder = builder.resolve(&name, addr);
                format!("{}:{}", name, addr.port())
            }
            None => endpoint.to_string(),
        };

        let http = builder
            .build()
            .map_err(|e| EchoError::Transport(format!("failed to build client: {}", e)))?;

        Ok(Self {
            http,
            base_url: format!("{}://{}", scheme, authority),
            authorization,
            timeout,
            wait_for_ready,
        })
    }

    /// Builds the connection and waits until the server answers.
    ///
    /// Any RPC-level answer, including a rejection, proves the transport
    /// is up. Only transport failures make the dial fail.
    pub async fn connect(endpoint: &str, options: &[ClientOption]) -> Result<Self> {
        let connection = Self::build(endpoint, options)?;
        tracing::info!("reaching out to: {}", connection.base_url());
        match connection.ping().await {
            Ok(_) | Err(EchoError::Request(_)) | Err(EchoError::Authentication(_)) => {
                tracing::info!("connection ready");
                Ok(connection)
            }
            Err(e) => Err(e),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends raw JSON to a method and returns the undecoded response.
    ///
    /// `authorization` replaces the connection's own token when given.
    pub async fn send(
        &self,
        method: EchoMethod,
        body: Vec<u8>,
        authorization: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, method.path());
        let authorization = authorization.or(self.authorization.as_deref());
        let deadline = Instant::now() + self.timeout;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut call = self
                .http
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let Some(value) = authorization {
                call = call.header(AUTHORIZATION, value);
            }

            match call.send().await {
                Ok(response) => return Ok(response),
                Err(e) if self.wait_for_ready && e.is_connect() && Instant::now() < deadline => {
                    let delay = retry_delay(attempt)
                        .min(deadline.saturating_duration_since(Instant::now()));
                    tracing::debug!(attempt, ?delay, "server not ready: {}", e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(EchoError::Transport(format!("call to {} failed: {}", url, e)));
                }
            }
        }
    }

    /// Calls a method and decodes its typed response
    pub async fn invoke<Req, Resp>(&self, method: EchoMethod, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request)
            .map_err(|e| EchoError::Request(RpcStatus::internal(format!("encode: {}", e))))?;
        let response = self.send(method, body, None).await?;
        decode(response).await
    }
}

impl EchoApi for RpcConnection {
    async fn ping(&self) -> Result<PingResponse> {
        self.invoke(EchoMethod::Ping, &Empty {}).await
    }

    async fn health(&self) -> Result<HealthResponse> {
        self.invoke(EchoMethod::Health, &Empty {}).await
    }

    async fn request(&self, value: &str) -> Result<EchoResponse> {
        let request = EchoRequest {
            value: value.to_string(),
        };
        self.invoke(EchoMethod::Request, &request).await
    }

    async fn faulty(&self) -> Result<Empty> {
        self.invoke(EchoMethod::Faulty, &Empty {}).await
    }

    async fn slow(&self) -> Result<Empty> {
        self.invoke(EchoMethod::Slow, &Empty {}).await
    }
}

/// Plain HTTP client for the gateway, sharing the RPC client's TLS trust
/// and certificate. It never sends the bearer token.
pub struct HttpPinger {
    client: Client,
    endpoint: String,
}

impl HttpPinger {
    /// Gateway route hit by `post_ping`
    pub const PING_PATH: &'static str = "/echo/ping";

    /// Returns `None` when no HTTP endpoint is configured.
    pub fn compose(config: &ClientConfiguration) -> Result<Option<Self>> {
        let Some(endpoint) = &config.http_endpoint else {
            return Ok(None);
        };

        let mut builder = Client::builder().use_rustls_tls().timeout(config.timeout);
        match &config.tls {
            Some(TrustMode::CustomCa(pem)) => {
                let ca = reqwest::Certificate::from_pem(pem)
                    .map_err(|e| EchoError::config(format!("invalid CA certificate: {}", e)))?;
                builder = builder.add_root_certificate(ca);
            }
            Some(TrustMode::InsecureSkipVerify) => {
                builder = builder.danger_accept_invalid_certs(true);
            }
            Some(TrustMode::SystemCa) | None => {}
        }

        if let Some(ClientCredential::Certificate(pair)) = &config.credential {
            tracing::info!("loading client certificate for HTTP client");
            builder = builder.identity(identity(pair)?);
        }

        let client = builder
            .build()
            .map_err(|e| EchoError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Some(Self {
            client,
            endpoint: endpoint.clone(),
        }))
    }

    /// Bare POST to the gateway's ping route
    pub async fn post_ping(&self) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.endpoint, Self::PING_PATH);
        self.client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| EchoError::Transport(format!("POST {} failed: {}", url, e)))
    }
}

/// Turns a raw response into a typed message or a call error
pub async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| EchoError::Transport(format!("failed to read response: {}", e)))?;

    if status.is_success() {
        return serde_json::from_slice(&bytes).map_err(|e| {
            EchoError::Request(RpcStatus::internal(format!("malformed response: {}", e)))
        });
    }

    let rpc_status = match serde_json::from_slice::<RpcErrorBody>(&bytes) {
        Ok(body) => RpcStatus::from_body(body),
        Err(_) => RpcStatus::new(
            RpcCode::from_http(status),
            String::from_utf8_lossy(&bytes).trim().to_string(),
        ),
    };

    if rpc_status.code == RpcCode::Unauthenticated {
        return Err(EchoError::Authentication(rpc_status.message));
    }
    Err(EchoError::Request(rpc_status))
}

fn identity(pair: &CredentialPair) -> Result<Identity> {
    let mut pem = pair.cert.clone();
    pem.push(b'\n');
    pem.extend_from_slice(&pair.key);
    Identity::from_pem(&pem)
        .map_err(|e| EchoError::config(format!("invalid client certificate or key: {}", e)))
}

fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr> {
    endpoint
        .to_socket_addrs()
        .map_err(|e| EchoError::config(format!("invalid endpoint {}: {}", endpoint, e)))?
        .next()
        .ok_or_else(|| EchoError::config(format!("endpoint {} did not resolve", endpoint)))
}

/// Exponential backoff with up to 10% jitter
fn retry_delay(attempt: u32) -> Duration {
    let exponential = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay_ms = RETRY_BASE_MS.saturating_mul(exponential).min(RETRY_MAX_MS);
    let jitter_range = delay_ms / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    Duration::from_millis(delay_ms + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Pki;

    fn base_config() -> ClientConfiguration {
        ClientConfiguration {
            endpoint: "127.0.0.1:9090".into(),
            http_endpoint: None,
            tls: None,
            credential: None,
            server_name_override: None,
            timeout: CLIENT_TIMEOUT,
            compression: true,
            wait_for_ready: true,
        }
    }

    fn client_pair(pki: &Pki) -> CredentialPair {
        CredentialPair::load(
            "client",
            Some(pki.client_cert.as_path()),
            Some(pki.client_key.as_path()),
        )
        .unwrap()
        .unwrap()
    }

    #[test]
    fn test_fixed_options() {
        let options = compose_client_options(&base_config()).unwrap();
        assert!(matches!(options[0], ClientOption::WaitForReady));
        assert!(matches!(options[1], ClientOption::Timeout(t) if t == Duration::from_secs(5)));
        assert!(matches!(options[2], ClientOption::Compression));
        assert!(!options.iter().any(|o| matches!(o, ClientOption::Tls(_))));
    }

    #[test]
    fn test_certificate_without_tls_is_rejected() {
        let pki = Pki::generate();
        let mut config = base_config();
        config.credential = Some(ClientCredential::Certificate(client_pair(&pki)));
        assert!(matches!(
            compose_client_options(&config),
            Err(EchoError::Configuration(_))
        ));

        config.tls = Some(TrustMode::SystemCa);
        let options = compose_client_options(&config).unwrap();
        assert!(options.iter().any(|o| matches!(o, ClientOption::AuthCertificate(_))));
    }

    #[test]
    fn test_token_option() {
        let mut config = base_config();
        config.credential = Some(ClientCredential::Token("secret".into()));
        let options = compose_client_options(&config).unwrap();
        let connection = RpcConnection::build(&config.endpoint, &options).unwrap();
        assert_eq!(connection.authorization.as_deref(), Some("Bearer secret"));
    }

    #[test]
    fn test_base_url_follows_tls_and_override() {
        let plain = RpcConnection::build("127.0.0.1:9090", &[]).unwrap();
        assert_eq!(plain.base_url(), "http://127.0.0.1:9090");

        let options = vec![
            ClientOption::Tls(TrustMode::InsecureSkipVerify),
            ClientOption::ServerNameOverride("echo.local".into()),
        ];
        let tls = RpcConnection::build("127.0.0.1:9443", &options).unwrap();
        assert_eq!(tls.base_url(), "https://echo.local:9443");
    }

    #[test]
    fn test_custom_ca_and_identity_are_accepted() {
        let pki = Pki::generate();
        let ca = crate::certs::read_pem(&pki.ca_cert).unwrap();
        let options = vec![
            ClientOption::Tls(TrustMode::CustomCa(ca)),
            ClientOption::AuthCertificate(client_pair(&pki)),
        ];
        assert!(RpcConnection::build("127.0.0.1:9443", &options).is_ok());
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        assert!(retry_delay(1) >= Duration::from_millis(RETRY_BASE_MS));
        assert!(retry_delay(2) >= Duration::from_millis(2 * RETRY_BASE_MS));
        let capped = retry_delay(20);
        assert!(capped >= Duration::from_millis(RETRY_MAX_MS));
        assert!(capped < Duration::from_millis(RETRY_MAX_MS + RETRY_MAX_MS / 10));
    }

    #[test]
    fn test_http_pinger_absent_without_endpoint() {
        assert!(HttpPinger::compose(&base_config()).unwrap().is_none());
    }

    /// Accepts one connection and returns the request head it received
    async fn capture_request_head() -> (SocketAddr, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let head = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{}")
                .await
                .unwrap();
            String::from_utf8_lossy(&received).to_ascii_lowercase()
        });
        (addr, head)
    }

    #[tokio::test]
    async fn test_compression_option_controls_accept_encoding() {
        let (addr, head) = capture_request_head().await;
        let plain = RpcConnection::build(&addr.to_string(), &[]).unwrap();
        plain.send(EchoMethod::Ping, b"{}".to_vec(), None).await.unwrap();
        assert!(!head.await.unwrap().contains("accept-encoding: gzip"));

        let (addr, head) = capture_request_head().await;
        let gzip = RpcConnection::build(&addr.to_string(), &[ClientOption::Compression]).unwrap();
        gzip.send(EchoMethod::Ping, b"{}".to_vec(), None).await.unwrap();
        assert!(head.await.unwrap().contains("accept-encoding: gzip"));
    }

    #[tokio::test]
    async fn test_http_pinger_never_sends_token() {
        let (addr, head) = capture_request_head().await;
        let mut config = base_config();
        config.http_endpoint = Some(format!("http://{}", addr));
        config.credential = Some(ClientCredential::Token("secret".into()));

        let pinger = HttpPinger::compose(&config).unwrap().unwrap();
        pinger.post_ping().await.unwrap();
        let head = head.await.unwrap();
        assert!(head.starts_with("post /echo/ping "), "{}", head);
        assert!(!head.contains("authorization"), "{}", head);
        assert!(!head.contains("secret"), "{}", head);
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_after_deadline() {
        let options = vec![
            ClientOption::WaitForReady,
            ClientOption::Timeout(Duration::from_millis(300)),
        ];
        let start = Instant::now();
        // Port 9 (discard) is closed on test machines.
        let result = RpcConnection::connect("127.0.0.1:9", &options).await;
        assert!(matches!(result, Err(EchoError::Transport(_))));
        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
