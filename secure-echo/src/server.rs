use crate::auth::{authenticate, Authenticator};
use crate::certs::{parse_certs, parse_private_key, root_store};
use crate::config::{AuthPolicy, ServiceConfiguration, TlsMaterial, FALLBACK_SERVER_NAME};
use crate::echo::EchoHandler;
use crate::error::{EchoError, Result};
use crate::gateway::GatewayBridge;
use crate::observability::{prometheus_handle, record_call};
use crate::rpc::{EchoMethod, RpcStatus};
use axum::{
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use metrics_exporter_prometheus::PrometheusHandle;
use rustls::server::{AllowAnyAnonymousOrAuthenticatedClient, AllowAnyAuthenticatedClient};
use rustls::{RootCertStore, ServerConfig};
use std::any::Any;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;

/// One piece of service configuration, applied in order by [`EchoServer::new`]
pub enum ServerOption {
    /// Address of the main RPC listener
    Bind(SocketAddr),
    ServerName(String),
    /// Transport security, including client certificate verification
    Tls(Arc<ServerConfig>),
    /// Per-call authentication; must come after `Tls`
    Auth(Authenticator),
    InputValidation,
    PanicRecovery,
    /// Log every call except the listed methods
    CallLogging { filtered: Vec<String> },
    Gateway(GatewayBridge),
    /// Export call metrics on the gateway
    Monitoring(PrometheusHandle),
}

impl std::fmt::Debug for ServerOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerOption::Bind(addr) => write!(f, "Bind({})", addr),
            ServerOption::ServerName(name) => write!(f, "ServerName({})", name),
            ServerOption::Tls(_) => f.write_str("Tls"),
            ServerOption::Auth(auth) => write!(f, "Auth({:?})", auth),
            ServerOption::InputValidation => f.write_str("InputValidation"),
            ServerOption::PanicRecovery => f.write_str("PanicRecovery"),
            ServerOption::CallLogging { filtered } => write!(f, "CallLogging({:?})", filtered),
            ServerOption::Gateway(bridge) => write!(f, "Gateway(port {})", bridge.port()),
            ServerOption::Monitoring(_) => f.write_str("Monitoring"),
        }
    }
}

/// Turns a service configuration into the ordered option set.
///
/// Every credential is parsed here, so any broken or contradictory setting
/// surfaces before a socket is opened.
pub fn compose_server_options(config: ServiceConfiguration) -> Result<Vec<ServerOption>> {
    let ServiceConfiguration {
        port,
        server_name,
        tls,
        auth,
        gateway,
        monitoring,
        ..
    } = config;

    let mut options = vec![
        ServerOption::Bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))),
        ServerOption::ServerName(server_name.clone()),
    ];

    // TLS first: authentication runs inside the negotiated transport
    let listener_tls = match &tls {
        Some(material) => {
            tracing::info!("TLS enabled");
            let tls_config = server_tls_config(material, &auth)?;
            options.push(ServerOption::Tls(tls_config.clone()));
            Some(tls_config)
        }
        None => {
            if matches!(auth, AuthPolicy::Certificate(_)) {
                return Err(EchoError::config(
                    "certificate authentication requires TLS to be enabled",
                ));
            }
            None
        }
    };

    let authenticator = match &auth {
        AuthPolicy::None => Authenticator::AllowAll,
        AuthPolicy::Token(secret) => {
            tracing::info!("enabling token validation");
            Authenticator::token(secret)
        }
        AuthPolicy::Certificate(_) => {
            tracing::info!("enabling certificate-based authentication");
            Authenticator::PeerCertificate
        }
    };
    options.push(ServerOption::Auth(authenticator));

    options.push(ServerOption::InputValidation);
    options.push(ServerOption::PanicRecovery);
    options.push(ServerOption::CallLogging {
        filtered: vec![EchoMethod::Ping.full_name()],
    });

    match gateway {
        Some(gateway) => {
            tracing::info!("HTTP interface enabled on port: {}", gateway.port);
            let client_cert_required = tls.as_ref().is_some_and(|m| m.require_client_cert)
                || matches!(auth, AuthPolicy::Certificate(_));
            if client_cert_required && gateway.relaxed_trust() {
                tracing::warn!(
                    "client certificates are required but the gateway has no client credential; \
                     gateway calls will be rejected"
                );
            }
            let bridge =
                GatewayBridge::compose(gateway, tls.as_ref(), &server_name, listener_tls)?;
            options.push(ServerOption::Gateway(bridge));

            if monitoring {
                tracing::info!("monitoring enabled on endpoint: /metrics");
                options.push(ServerOption::Monitoring(prometheus_handle()));
            }
        }
        None => {
            if monitoring {
                tracing::warn!("monitoring requires the HTTP gateway, ignoring");
            }
        }
    }

    Ok(options)
}

enum ClientVerification {
    None,
    Optional(RootCertStore),
    Required(RootCertStore),
}

fn client_verification(material: &TlsMaterial, auth: &AuthPolicy) -> Result<ClientVerification> {
    if let AuthPolicy::Certificate(trusted) = auth {
        return Ok(ClientVerification::Required(root_store(trusted.bundles())?));
    }
    if material.require_client_cert {
        if material.custom_cas.is_empty() {
            return Err(EchoError::config(
                "requiring client certificates needs a CA to verify them",
            ));
        }
        return Ok(ClientVerification::Required(root_store(&material.custom_cas)?));
    }
    if !material.custom_cas.is_empty() {
        return Ok(ClientVerification::Optional(root_store(&material.custom_cas)?));
    }
    Ok(ClientVerification::None)
}

/// Builds the rustls configuration shared by the RPC and gateway listeners
pub fn server_tls_config(material: &TlsMaterial, auth: &AuthPolicy) -> Result<Arc<ServerConfig>> {
    let certs = parse_certs(&material.identity.cert)?;
    let key = parse_private_key(&material.identity.key)?;

    let builder = ServerConfig::builder().with_safe_defaults();
    let builder = match client_verification(material, auth)? {
        ClientVerification::None => builder.with_no_client_auth(),
        ClientVerification::Optional(roots) => builder.with_client_cert_verifier(Arc::new(
            AllowAnyAnonymousOrAuthenticatedClient::new(roots),
        )),
        ClientVerification::Required(roots) => {
            builder.with_client_cert_verifier(Arc::new(AllowAnyAuthenticatedClient::new(roots)))
        }
    };

    let config = builder
        .with_single_cert(certs, key)
        .map_err(|e| EchoError::config(format!("invalid TLS certificate or key: {}", e)))?;

    Ok(Arc::new(config))
}

/// A bound-on-demand HTTP listener: address, optional TLS and routes
pub struct Listener {
    addr: SocketAddr,
    tls: Option<RustlsConfig>,
    router: Router,
}

impl Listener {
    pub fn new(addr: SocketAddr, tls: Option<RustlsConfig>, router: Router) -> Self {
        Self { addr, tls, router }
    }

    /// Serves until `handle` is shut down. Readiness is signalled through
    /// `handle.listening()`.
    pub async fn serve(self, handle: Handle) -> std::io::Result<()> {
        let app = self.router.into_make_service();
        match self.tls {
            Some(tls) => {
                axum_server::bind_rustls(self.addr, tls)
                    .handle(handle)
                    .serve(app)
                    .await
            }
            None => axum_server::bind(self.addr).handle(handle).serve(app).await,
        }
    }
}

/// The composed echo service, ready to be started
pub struct EchoServer {
    server_name: String,
    listener: Listener,
    gateway: Option<GatewayBridge>,
}

impl EchoServer {
    /// Applies the options in order. Fails on an option set that violates
    /// the ordering rules, without opening any socket.
    pub fn new(options: Vec<ServerOption>) -> Result<Self> {
        let mut addr = None;
        let mut server_name = FALLBACK_SERVER_NAME.to_string();
        let mut tls: Option<Arc<ServerConfig>> = None;
        let mut authenticator: Option<Authenticator> = None;
        let mut validate_input = false;
        let mut panic_recovery = false;
        let mut call_logging: Option<Vec<String>> = None;
        let mut gateway: Option<GatewayBridge> = None;
        let mut monitoring: Option<PrometheusHandle> = None;

        for option in options {
            match option {
                ServerOption::Bind(bind) => addr = Some(bind),
                ServerOption::ServerName(name) => server_name = name,
                ServerOption::Tls(config) => {
                    if authenticator.is_some() {
                        return Err(EchoError::config(
                            "TLS must be configured before authentication",
                        ));
                    }
                    tls = Some(config);
                }
                ServerOption::Auth(auth) => {
                    if matches!(auth, Authenticator::PeerCertificate) && tls.is_none() {
                        return Err(EchoError::config(
                            "certificate authentication requires TLS to be configured first",
                        ));
                    }
                    authenticator = Some(auth);
                }
                ServerOption::InputValidation => validate_input = true,
                ServerOption::PanicRecovery => panic_recovery = true,
                ServerOption::CallLogging { filtered } => call_logging = Some(filtered),
                ServerOption::Gateway(bridge) => gateway = Some(bridge),
                ServerOption::Monitoring(handle) => monitoring = Some(handle),
            }
        }

        let addr = addr.ok_or_else(|| EchoError::config("no listening address configured"))?;

        if let Some(handle) = monitoring {
            match gateway.as_mut() {
                Some(bridge) => bridge.enable_monitoring(handle),
                None => return Err(EchoError::config("monitoring requires the HTTP gateway")),
            }
        }
        let record_metrics = gateway.as_ref().is_some_and(GatewayBridge::monitoring);

        let mut router = EchoHandler::new(validate_input).router();
        if panic_recovery {
            router = router.layer(CatchPanicLayer::custom(recover_panic));
        }
        router = router.layer(middleware::from_fn_with_state(
            authenticator.unwrap_or(Authenticator::AllowAll),
            authenticate,
        ));
        if let Some(filtered) = call_logging {
            let calls = Arc::new(CallLog {
                filtered,
                record_metrics,
            });
            router = router.layer(middleware::from_fn_with_state(calls, log_calls));
        }
        router = router.layer(CompressionLayer::new());

        Ok(Self {
            server_name,
            listener: Listener::new(addr, tls.map(RustlsConfig::from_config), router),
            gateway,
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn gateway(&self) -> Option<&GatewayBridge> {
        self.gateway.as_ref()
    }

    pub(crate) fn into_parts(self) -> (Listener, Option<GatewayBridge>) {
        (self.listener, self.gateway)
    }
}

/// Label for calls that do not resolve to an echo method
const UNKNOWN_METHOD: &str = "unknown";

struct CallLog {
    filtered: Vec<String>,
    record_metrics: bool,
}

async fn log_calls<B>(State(calls): State<Arc<CallLog>>, request: Request<B>, next: Next<B>) -> Response {
    let path = request.uri().path().to_string();
    // label by the resolved method so stray paths cannot grow the series set
    let method = EchoMethod::from_path(&path)
        .map(EchoMethod::full_name)
        .unwrap_or_else(|| UNKNOWN_METHOD.to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();
    if !calls.filtered.iter().any(|m| *m == method) {
        if status.is_success() {
            tracing::info!(
                method = %method,
                status = status.as_u16(),
                duration_ms = elapsed.as_millis() as u64,
                "call finished"
            );
        } else {
            tracing::warn!(
                method = %method,
                path = %path,
                status = status.as_u16(),
                duration_ms = elapsed.as_millis() as u64,
                "call failed"
            );
        }
    }
    if calls.record_metrics {
        record_call(&method, status.as_u16(), elapsed);
    }

    response
}

fn recover_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "handler panicked");
    RpcStatus::internal("internal error").into_response()
}
