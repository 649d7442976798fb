//! Configuration values and their resolution from command line flags and
//! `ECHO_*` environment variables.
//!
//! Flag parsing is clap's job. [`ServerArgs::resolve`] and
//! [`ClientArgs::resolve`] turn the parsed flags into immutable
//! configuration values, reading every credential file exactly once on the
//! way. Nothing downstream looks at flags or the environment again.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::certs::{read_pem, CredentialPair};
use crate::error::{EchoError, Result};

/// Name advertised when no `--name` is given and the host name is unknown
pub const FALLBACK_SERVER_NAME: &str = "sample-echo-server.local";

/// Timeout applied to every client call, including the wait-for-ready dial
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to compose a running service
#[derive(Debug, Clone)]
pub struct ServiceConfiguration {
    /// TCP port of the main RPC listener (0 picks an ephemeral port)
    pub port: u16,

    /// FQDN the server advertises; must match the certificate when TLS is on
    pub server_name: String,

    pub tls: Option<TlsMaterial>,

    pub auth: AuthPolicy,

    pub gateway: Option<GatewayConfig>,

    /// Export Prometheus metrics on the gateway
    pub monitoring: bool,

    pub log_format: LogFormat,
}

/// Server side TLS material
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub identity: CredentialPair,

    /// Extra CAs trusted when verifying client certificates
    pub custom_cas: Vec<Vec<u8>>,

    /// Reject handshakes that do not present a valid client certificate
    pub require_client_cert: bool,
}

/// Peer authentication. Exactly one mode is active at a time.
#[derive(Debug, Clone, Default)]
pub enum AuthPolicy {
    #[default]
    None,
    Token(String),
    Certificate(TrustedCaSet),
}

/// Non-empty set of PEM encoded CA bundles
#[derive(Debug, Clone)]
pub struct TrustedCaSet(Vec<Vec<u8>>);

impl TrustedCaSet {
    pub fn new(bundles: Vec<Vec<u8>>) -> Result<Self> {
        if bundles.iter().all(|b| b.is_empty()) {
            return Err(EchoError::config(
                "certificate authentication requires at least one trusted CA",
            ));
        }
        Ok(Self(bundles))
    }

    pub fn bundles(&self) -> &[Vec<u8>] {
        &self.0
    }
}

/// HTTP gateway settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,

    /// Credential used by the gateway's internal client. When absent the
    /// gateway trusts the co-located server without verifying it.
    pub client_credential: Option<CredentialPair>,
}

impl GatewayConfig {
    /// The internal hop skips certificate verification. Only sound while
    /// gateway and service share a process.
    pub fn relaxed_trust(&self) -> bool {
        self.client_credential.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Everything needed to compose a client connection
#[derive(Debug, Clone)]
pub struct ClientConfiguration {
    /// `host:port` of the RPC server
    pub endpoint: String,

    /// Base URL of the HTTP gateway, if any
    pub http_endpoint: Option<String>,

    /// `None` means plaintext
    pub tls: Option<TrustMode>,

    pub credential: Option<ClientCredential>,

    pub server_name_override: Option<String>,

    pub timeout: Duration,

    pub compression: bool,

    pub wait_for_ready: bool,
}

/// How the client verifies the server certificate
#[derive(Debug, Clone)]
pub enum TrustMode {
    SystemCa,
    CustomCa(Vec<u8>),
    InsecureSkipVerify,
}

#[derive(Debug, Clone)]
pub enum ClientCredential {
    Token(String),
    Certificate(CredentialPair),
}

/// `server` subcommand flags
#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// TCP port to use for the main RPC server
    #[arg(long, env = "ECHO_SERVER_PORT", default_value_t = 9090)]
    pub port: u16,

    /// FQDN server name, if using a certificate it must be valid for it
    #[arg(long, env = "ECHO_SERVER_NAME")]
    pub name: Option<String>,

    /// Certificate to use for TLS communications
    #[arg(long, env = "ECHO_SERVER_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Private key corresponding to the TLS certificate
    #[arg(long, env = "ECHO_SERVER_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Custom certificate authority to use for TLS communications
    #[arg(long, env = "ECHO_SERVER_TLS_CA")]
    pub tls_ca: Option<PathBuf>,

    /// Reject TLS clients that do not present a valid certificate
    #[arg(long, env = "ECHO_SERVER_TLS_REQUIRE_CLIENT_CERT")]
    pub require_client_cert: bool,

    /// CA used to verify client certificates as credentials
    #[arg(long, env = "ECHO_SERVER_AUTH_CA")]
    pub client_ca: Option<PathBuf>,

    /// Shared token clients must present
    #[arg(long, env = "ECHO_SERVER_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Enable the HTTP gateway
    #[arg(long, env = "ECHO_SERVER_HTTP")]
    pub http: bool,

    /// Port to use for the HTTP gateway
    #[arg(long, env = "ECHO_SERVER_HTTP_PORT", default_value_t = 9091)]
    pub http_port: u16,

    /// Client certificate used by the HTTP gateway
    #[arg(long, env = "ECHO_SERVER_HTTP_CERT")]
    pub http_cert: Option<PathBuf>,

    /// Private key used by the HTTP gateway
    #[arg(long, env = "ECHO_SERVER_HTTP_KEY")]
    pub http_key: Option<PathBuf>,

    /// Log messages in JSON format (text by default)
    #[arg(long, env = "ECHO_SERVER_LOG_JSON")]
    pub log_json: bool,

    /// Export metrics on the HTTP gateway
    #[arg(long, env = "ECHO_SERVER_MONITORING")]
    pub monitoring: bool,
}

impl ServerArgs {
    pub fn log_format(&self) -> LogFormat {
        if self.log_json {
            LogFormat::Json
        } else {
            LogFormat::Plain
        }
    }

    /// Merges flags, environment and defaults into a service configuration,
    /// loading all referenced credential files.
    pub fn resolve(&self) -> Result<ServiceConfiguration> {
        let server_name = self
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|n| !n.is_empty()))
            .unwrap_or_else(|| FALLBACK_SERVER_NAME.to_string());

        let tls = match CredentialPair::load(
            "TLS",
            self.tls_cert.as_deref(),
            self.tls_key.as_deref(),
        )? {
            Some(identity) => {
                let custom_cas = match &self.tls_ca {
                    Some(path) => {
                        tracing::debug!("loading CA: {:?}", path);
                        vec![read_pem(path)?]
                    }
                    None => Vec::new(),
                };
                Some(TlsMaterial {
                    identity,
                    custom_cas,
                    require_client_cert: self.require_client_cert,
                })
            }
            None => {
                if self.tls_ca.is_some() || self.require_client_cert {
                    return Err(EchoError::config(
                        "TLS options given without a server certificate and key",
                    ));
                }
                None
            }
        };

        let auth = match (non_empty(&self.auth_token), &self.client_ca) {
            (Some(_), Some(_)) => {
                return Err(EchoError::config(
                    "token and certificate authentication are mutually exclusive",
                ));
            }
            (Some(token), None) => AuthPolicy::Token(token.to_string()),
            (None, Some(path)) => {
                tracing::debug!("loading client CA: {:?}", path);
                AuthPolicy::Certificate(TrustedCaSet::new(vec![read_pem(path)?])?)
            }
            (None, None) => AuthPolicy::None,
        };

        let gateway_credential = CredentialPair::load(
            "gateway client",
            self.http_cert.as_deref(),
            self.http_key.as_deref(),
        )?;
        let gateway = if self.http {
            Some(GatewayConfig {
                port: self.http_port,
                client_credential: gateway_credential,
            })
        } else {
            if gateway_credential.is_some() {
                tracing::warn!("gateway credentials given but the HTTP gateway is disabled");
            }
            None
        };

        Ok(ServiceConfiguration {
            port: self.port,
            server_name,
            tls,
            auth,
            gateway,
            monitoring: self.monitoring,
            log_format: self.log_format(),
        })
    }
}

/// `client` subcommand flags
#[derive(Args, Debug, Clone, Default)]
pub struct ClientArgs {
    /// RPC server endpoint
    #[arg(long, env = "ECHO_CLIENT_RPC")]
    pub rpc: Option<String>,

    /// HTTP(S) gateway endpoint, if any
    #[arg(long, env = "ECHO_CLIENT_HTTP")]
    pub http: Option<String>,

    /// Enable TLS communications
    #[arg(long, env = "ECHO_CLIENT_TLS")]
    pub tls: bool,

    /// Custom certificate authority to use for TLS
    #[arg(long, env = "ECHO_CLIENT_TLS_CA")]
    pub tls_ca: Option<PathBuf>,

    /// Client TLS certificate
    #[arg(long, env = "ECHO_CLIENT_TLS_CERT")]
    pub client_cert: Option<PathBuf>,

    /// Client private key
    #[arg(long, env = "ECHO_CLIENT_TLS_KEY")]
    pub client_key: Option<PathBuf>,

    /// Server name override, must be valid for the TLS certificate if used
    #[arg(long, env = "ECHO_CLIENT_SERVER")]
    pub server_override: Option<String>,

    /// Accept any server certificate (testing only)
    #[arg(long, env = "ECHO_CLIENT_TLS_INSECURE")]
    pub insecure_skip_verify: bool,

    /// Token to present as authentication
    #[arg(long, env = "ECHO_CLIENT_AUTH_TOKEN")]
    pub auth_token: Option<String>,
}

impl ClientArgs {
    pub fn resolve(&self) -> Result<ClientConfiguration> {
        let endpoint = non_empty(&self.rpc)
            .ok_or_else(|| EchoError::config("you must specify the RPC endpoint"))?
            .to_string();

        let tls = if self.tls {
            match (&self.tls_ca, self.insecure_skip_verify) {
                (Some(path), insecure) => {
                    if insecure {
                        tracing::warn!("custom CA given, ignoring insecure-skip-verify");
                    }
                    tracing::info!("custom certificate authority: {:?}", path);
                    Some(TrustMode::CustomCa(read_pem(path)?))
                }
                (None, true) => Some(TrustMode::InsecureSkipVerify),
                (None, false) => Some(TrustMode::SystemCa),
            }
        } else {
            None
        };

        let certificate = CredentialPair::load(
            "client",
            self.client_cert.as_deref(),
            self.client_key.as_deref(),
        )?;
        let credential = match (non_empty(&self.auth_token), certificate) {
            (Some(_), Some(_)) => {
                return Err(EchoError::config(
                    "token and certificate authentication are mutually exclusive",
                ));
            }
            (Some(token), None) => Some(ClientCredential::Token(token.to_string())),
            (None, Some(pair)) => Some(ClientCredential::Certificate(pair)),
            (None, None) => None,
        };

        Ok(ClientConfiguration {
            endpoint,
            http_endpoint: non_empty(&self.http).map(|s| s.trim_end_matches('/').to_string()),
            tls,
            credential,
            server_name_override: non_empty(&self.server_override).map(str::to_string),
            timeout: CLIENT_TIMEOUT,
            compression: true,
            wait_for_ready: true,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Pki;

    #[test]
    fn test_plain_server_defaults() {
        let args = ServerArgs {
            port: 9090,
            http_port: 9091,
            name: Some("echo.local".into()),
            ..Default::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.server_name, "echo.local");
        assert!(config.tls.is_none());
        assert!(matches!(config.auth, AuthPolicy::None));
        assert!(config.gateway.is_none());
        assert_eq!(config.log_format, LogFormat::Plain);
    }

    #[test]
    fn test_server_tls_and_cert_auth() {
        let pki = Pki::generate();
        let args = ServerArgs {
            tls_cert: Some(pki.server_cert.clone()),
            tls_key: Some(pki.server_key.clone()),
            client_ca: Some(pki.ca_cert.clone()),
            ..Default::default()
        };
        let config = args.resolve().unwrap();
        assert!(config.tls.is_some());
        match config.auth {
            AuthPolicy::Certificate(cas) => assert_eq!(cas.bundles().len(), 1),
            other => panic!("unexpected auth policy: {:?}", other),
        }
    }

    #[test]
    fn test_server_tls_cert_without_key() {
        let pki = Pki::generate();
        let args = ServerArgs {
            tls_cert: Some(pki.server_cert.clone()),
            ..Default::default()
        };
        assert!(matches!(args.resolve(), Err(EchoError::Configuration(_))));
    }

    #[test]
    fn test_server_unreadable_client_ca() {
        let args = ServerArgs {
            client_ca: Some(PathBuf::from("missing/ca.crt")),
            ..Default::default()
        };
        assert!(matches!(args.resolve(), Err(EchoError::CredentialIo { .. })));
    }

    #[test]
    fn test_server_token_and_cert_auth_conflict() {
        let pki = Pki::generate();
        let args = ServerArgs {
            auth_token: Some("secret".into()),
            client_ca: Some(pki.ca_cert.clone()),
            ..Default::default()
        };
        assert!(matches!(args.resolve(), Err(EchoError::Configuration(_))));
    }

    #[test]
    fn test_gateway_cert_without_key() {
        let pki = Pki::generate();
        let args = ServerArgs {
            http: true,
            http_cert: Some(pki.client_cert.clone()),
            ..Default::default()
        };
        assert!(matches!(args.resolve(), Err(EchoError::Configuration(_))));
    }

    #[test]
    fn test_gateway_relaxed_trust_by_default() {
        let args = ServerArgs {
            http: true,
            http_port: 9191,
            ..Default::default()
        };
        let gateway = args.resolve().unwrap().gateway.unwrap();
        assert_eq!(gateway.port, 9191);
        assert!(gateway.relaxed_trust());
    }

    #[test]
    fn test_trusted_ca_set_must_not_be_empty() {
        assert!(TrustedCaSet::new(Vec::new()).is_err());
        assert!(TrustedCaSet::new(vec![Vec::new()]).is_err());
    }

    #[test]
    fn test_client_requires_endpoint() {
        let args = ClientArgs::default();
        assert!(matches!(args.resolve(), Err(EchoError::Configuration(_))));
    }

    #[test]
    fn test_client_trust_precedence() {
        let pki = Pki::generate();
        let mut args = ClientArgs {
            rpc: Some("localhost:9090".into()),
            tls: true,
            tls_ca: Some(pki.ca_cert.clone()),
            insecure_skip_verify: true,
            ..Default::default()
        };
        assert!(matches!(
            args.resolve().unwrap().tls,
            Some(TrustMode::CustomCa(_))
        ));

        args.tls_ca = None;
        assert!(matches!(
            args.resolve().unwrap().tls,
            Some(TrustMode::InsecureSkipVerify)
        ));

        args.insecure_skip_verify = false;
        assert!(matches!(args.resolve().unwrap().tls, Some(TrustMode::SystemCa)));

        args.tls = false;
        assert!(args.resolve().unwrap().tls.is_none());
    }

    #[test]
    fn test_client_fixed_call_settings() {
        let args = ClientArgs {
            rpc: Some("localhost:9090".into()),
            http: Some("http://localhost:9091/".into()),
            ..Default::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.compression);
        assert!(config.wait_for_ready);
        assert_eq!(config.http_endpoint.as_deref(), Some("http://localhost:9091"));
    }

    #[test]
    fn test_client_token_and_cert_conflict() {
        let pki = Pki::generate();
        let args = ClientArgs {
            rpc: Some("localhost:9090".into()),
            tls: true,
            client_cert: Some(pki.client_cert.clone()),
            client_key: Some(pki.client_key.clone()),
            auth_token: Some("secret".into()),
            ..Default::default()
        };
        assert!(matches!(args.resolve(), Err(EchoError::Configuration(_))));
    }
}
