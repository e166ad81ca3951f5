//! Startup compatibility check against the relay server.
//!
//! The client asks `GET <base>/version` before subscribing. A server
//! answering 404 predates version negotiation entirely and is too old to
//! talk to; a server newer than the client means the client must upgrade.
//! Both are fatal. An unreachable server or a garbled answer only warns -
//! the reconnect loop deals with transient trouble.

use std::time::Duration;

use anyhow::{Result, bail};
use hookrelay_core::version::{Compatibility, VERSION_HEADER, check};
use reqwest::StatusCode;
use serde::Deserialize;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    version: String,
}

/// Checks the server's version against `client_version`.
///
/// # Errors
///
/// Returns an error (fatal for the client) when the server predates
/// version negotiation or is newer than this client.
pub async fn check_server_version(server_url: &str, client_version: &str) -> Result<()> {
    let Some(base) = base_server_url(server_url) else {
        tracing::warn!(url = server_url, "could not derive server base URL, skipping version check");
        return Ok(());
    };
    let version_url = format!("{base}/version");

    let client = reqwest::Client::builder()
        .timeout(VERSION_CHECK_TIMEOUT)
        .build()?;
    let response = match client.get(&version_url).send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "could not check server version");
            return Ok(());
        }
    };

    if response.status() == StatusCode::NOT_FOUND {
        bail!(
            "the server at {base} is too old and does not support version checking; \
             upgrade the server or use an older client"
        );
    }
    if !response.status().is_success() {
        tracing::warn!(
            status = response.status().as_u16(),
            "unexpected status while checking server version"
        );
        return Ok(());
    }

    let header_version = response
        .headers()
        .get(VERSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from);
    let server_version = match header_version {
        Some(version) => version,
        None => match response.json::<VersionResponse>().await {
            Ok(body) => body.version,
            Err(err) => {
                tracing::warn!(error = %err, "could not parse server version");
                return Ok(());
            }
        },
    };
    if server_version.is_empty() {
        return Ok(());
    }

    match check(client_version, &server_version) {
        Compatibility::UpToDate => {
            tracing::debug!(version = %server_version, "client and server versions match");
        }
        Compatibility::Dev => {
            tracing::warn!(
                client = client_version,
                server = %server_version,
                "version mismatch with development version"
            );
        }
        Compatibility::ClientNewer => {
            tracing::warn!(
                client = client_version,
                server = %server_version,
                "version mismatch"
            );
        }
        Compatibility::ClientOlder => {
            bail!(
                "client version {client_version} is too old, server is {server_version}; \
                 please upgrade your hookrelay client"
            );
        }
    }

    tracing::info!(version = %server_version, "server version");
    Ok(())
}

/// Reduces a channel URL to the server origin (`scheme://host[:port]`).
fn base_server_url(server_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(server_url).ok()?;
    match url.origin() {
        origin if origin.is_tuple() => Some(origin.ascii_serialization()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::response::IntoResponse;
    use axum::routing::get;

    use super::*;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        // A channel URL, as passed on the command line.
        format!("http://{addr}/abcdef123456")
    }

    fn version_router(version: &'static str) -> Router {
        Router::new().route(
            "/version",
            get(move || async move {
                (
                    [(VERSION_HEADER, version)],
                    axum::Json(serde_json::json!({ "version": version })),
                )
                    .into_response()
            }),
        )
    }

    #[test]
    fn test_base_server_url() {
        assert_eq!(
            base_server_url("https://relay.example.com/abcdef123456").as_deref(),
            Some("https://relay.example.com")
        );
        assert_eq!(
            base_server_url("http://localhost:3333/abcdef123456").as_deref(),
            Some("http://localhost:3333")
        );
        assert_eq!(base_server_url("not a url"), None);
    }

    #[tokio::test]
    async fn test_missing_version_endpoint_is_fatal() {
        let url = spawn(Router::new()).await;
        let err = check_server_version(&url, "1.3.0").await.unwrap_err();
        assert!(err.to_string().contains("too old"), "{err}");
    }

    #[tokio::test]
    async fn test_older_client_is_fatal() {
        let url = spawn(version_router("1.3.0")).await;
        let err = check_server_version(&url, "1.2.0").await.unwrap_err();
        assert!(err.to_string().contains("upgrade"), "{err}");
    }

    #[tokio::test]
    async fn test_matching_and_newer_clients_proceed() {
        let url = spawn(version_router("1.2.0")).await;
        assert!(check_server_version(&url, "1.2.0").await.is_ok());
        assert!(check_server_version(&url, "1.3.0").await.is_ok());
    }

    #[tokio::test]
    async fn test_dev_server_only_warns() {
        let url = spawn(version_router("dev")).await;
        assert!(check_server_version(&url, "1.2.0").await.is_ok());
    }

    #[tokio::test]
    async fn test_version_from_body_when_header_absent() {
        let router = Router::new().route(
            "/version",
            get(|| async { axum::Json(serde_json::json!({ "version": "99.0.0" })) }),
        );
        let url = spawn(router).await;
        let err = check_server_version(&url, "1.0.0").await.unwrap_err();
        assert!(err.to_string().contains("upgrade"), "{err}");
    }

    #[tokio::test]
    async fn test_unreachable_server_proceeds_with_warning() {
        // Nothing listens on port 1.
        assert!(
            check_server_version("http://127.0.0.1:1/abcdef123456", "1.0.0")
                .await
                .is_ok()
        );
    }
}
