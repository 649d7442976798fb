//! HTTP gateway in front of the RPC listener.
//!
//! `POST /echo/<method>` is translated into the matching RPC call, made
//! through an internal [`RpcConnection`] to `127.0.0.1:<rpc port>`. The RPC
//! status and body are relayed back unchanged. With monitoring enabled the
//! gateway also serves the Prometheus exposition on `/metrics`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use metrics_exporter_prometheus::PrometheusHandle;
use rustls::ServerConfig;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::client::{ClientOption, RpcConnection};
use crate::config::{GatewayConfig, TlsMaterial, TrustMode, CLIENT_TIMEOUT};
use crate::error::Result;
use crate::rpc::{EchoMethod, RpcCode, RpcStatus};
use crate::server::Listener;

pub const METRICS_PATH: &str = "/metrics";

/// Gateway settings resolved against the main listener
pub struct GatewayBridge {
    port: u16,
    client_options: Vec<ClientOption>,
    tls: Option<RustlsConfig>,
    metrics: Option<PrometheusHandle>,
}

impl GatewayBridge {
    /// Derives the internal client options from the server's TLS setup.
    ///
    /// The gateway listener reuses `listener_tls`, so it presents the same
    /// certificate and applies the same client verification as the RPC
    /// listener.
    pub fn compose(
        config: GatewayConfig,
        tls: Option<&TlsMaterial>,
        server_name: &str,
        listener_tls: Option<Arc<ServerConfig>>,
    ) -> Result<Self> {
        let mut client_options = vec![
            ClientOption::WaitForReady,
            ClientOption::Timeout(CLIENT_TIMEOUT),
        ];

        match (tls, config.client_credential) {
            (Some(_), None) => {
                tracing::debug!("gateway skips verification of the co-located server");
                client_options.push(ClientOption::Tls(TrustMode::InsecureSkipVerify));
            }
            (Some(material), Some(pair)) => {
                let trust = if material.custom_cas.is_empty() {
                    TrustMode::SystemCa
                } else {
                    TrustMode::CustomCa(material.custom_cas.join(&b'\n'))
                };
                client_options.push(ClientOption::ServerNameOverride(server_name.to_string()));
                client_options.push(ClientOption::Tls(trust));
                client_options.push(ClientOption::AuthCertificate(pair));
            }
            (None, Some(_)) => {
                tracing::warn!("gateway client certificate ignored, the server does not use TLS");
            }
            (None, None) => {}
        }

        // Surfaces a broken gateway credential before anything listens
        RpcConnection::build(&upstream(0), &client_options)?;

        Ok(Self {
            port: config.port,
            client_options,
            tls: listener_tls.map(RustlsConfig::from_config),
            metrics: None,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn monitoring(&self) -> bool {
        self.metrics.is_some()
    }

    pub(crate) fn enable_monitoring(&mut self, handle: PrometheusHandle) {
        self.metrics = Some(handle);
    }

    /// Gateway listener forwarding to the RPC listener bound at `rpc_addr`
    pub fn listener(&self, rpc_addr: SocketAddr) -> Result<Listener> {
        let upstream = RpcConnection::build(&upstream(rpc_addr.port()), &self.client_options)?;
        let mut router = Router::new();
        for method in EchoMethod::ALL {
            router = router.route(
                &method.route(),
                post(
                    move |State(upstream): State<Arc<RpcConnection>>, headers: HeaderMap, body: Bytes| {
                        translate(upstream, method, headers, body)
                    },
                ),
            );
        }
        let mut router = router
            .fallback(unknown_route)
            .with_state(Arc::new(upstream));

        if let Some(handle) = &self.metrics {
            router = router.merge(
                Router::new()
                    .route(METRICS_PATH, get(render_metrics))
                    .with_state(handle.clone()),
            );
        }

        Ok(Listener::new(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port)),
            self.tls.clone(),
            router,
        ))
    }
}

fn upstream(port: u16) -> String {
    format!("{}:{}", Ipv4Addr::LOCALHOST, port)
}

async fn unknown_route(uri: Uri) -> Response {
    RpcStatus::new(RpcCode::NotFound, format!("unknown method: {}", uri.path())).into_response()
}

async fn translate(
    upstream: Arc<RpcConnection>,
    method: EchoMethod,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = if body.is_empty() {
        b"{}".to_vec()
    } else {
        body.to_vec()
    };
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

    match upstream.send(method, body, authorization).await {
        Ok(response) => relay(response).await,
        Err(e) => {
            tracing::warn!(method = method.name(), "gateway call failed: {}", e);
            RpcStatus::unavailable("upstream RPC call failed").into_response()
        }
    }
}

async fn relay(response: reqwest::Response) -> Response {
    let status = response.status();
    let content_type = response.headers().get(CONTENT_TYPE).cloned();

    match response.bytes().await {
        Ok(bytes) => {
            let mut relayed = (status, bytes).into_response();
            if let Some(value) = content_type {
                relayed.headers_mut().insert(CONTENT_TYPE, value);
            }
            relayed
        }
        Err(e) => {
            tracing::warn!("failed to read upstream response: {}", e);
            RpcStatus::unavailable("upstream response was truncated").into_response()
        }
    }
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::CredentialPair;
    use crate::testing::Pki;

    fn material(pki: &Pki, custom_ca: bool) -> TlsMaterial {
        TlsMaterial {
            identity: CredentialPair::load(
                "TLS",
                Some(pki.server_cert.as_path()),
                Some(pki.server_key.as_path()),
            )
            .unwrap()
            .unwrap(),
            custom_cas: if custom_ca {
                vec![std::fs::read(&pki.ca_cert).unwrap()]
            } else {
                Vec::new()
            },
            require_client_cert: false,
        }
    }

    fn has_insecure(options: &[ClientOption]) -> bool {
        options
            .iter()
            .any(|o| matches!(o, ClientOption::Tls(TrustMode::InsecureSkipVerify)))
    }

    #[test]
    fn test_plaintext_bridge_has_no_tls() {
        let config = GatewayConfig {
            port: 0,
            client_credential: None,
        };
        let bridge = GatewayBridge::compose(config, None, "localhost", None).unwrap();
        assert!(!bridge
            .client_options
            .iter()
            .any(|o| matches!(o, ClientOption::Tls(_))));
        assert!(!bridge.monitoring());
    }

    #[test]
    fn test_relaxed_trust_without_credential() {
        let pki = Pki::generate();
        let config = GatewayConfig {
            port: 0,
            client_credential: None,
        };
        let bridge =
            GatewayBridge::compose(config, Some(&material(&pki, false)), "localhost", None)
                .unwrap();
        assert!(has_insecure(&bridge.client_options));
    }

    #[test]
    fn test_credential_replaces_relaxed_trust() {
        let pki = Pki::generate();
        let pair = CredentialPair::load(
            "gateway",
            Some(pki.client_cert.as_path()),
            Some(pki.client_key.as_path()),
        )
        .unwrap()
        .unwrap();
        let config = GatewayConfig {
            port: 0,
            client_credential: Some(pair),
        };
        let bridge =
            GatewayBridge::compose(config, Some(&material(&pki, true)), "localhost", None)
                .unwrap();
        assert!(!has_insecure(&bridge.client_options));
        assert!(bridge
            .client_options
            .iter()
            .any(|o| matches!(o, ClientOption::ServerNameOverride(n) if n == "localhost")));
        assert!(bridge
            .client_options
            .iter()
            .any(|o| matches!(o, ClientOption::AuthCertificate(_))));
    }

    #[test]
    fn test_listener_targets_loopback() {
        let config = GatewayConfig {
            port: 0,
            client_credential: None,
        };
        let bridge = GatewayBridge::compose(config, None, "localhost", None).unwrap();
        assert_eq!(upstream(9090), "127.0.0.1:9090");
        assert!(bridge.listener(SocketAddr::from(([127, 0, 0, 1], 9090))).is_ok());
    }
}
