//! Shared HTTP client configuration for platform requests.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use vaultshop_core::Error;

/// Default timeout for HTTP requests (30 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout (10 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// User agent matching the game client
pub const GAME_USER_AGENT: &str =
    "PAYDAY3/++UE4+Release-4.27-CL-0 Windows/10.0.19045.1.256.64bit";

/// Headers the platform expects on every request so traffic is
/// indistinguishable from the game client's own.
fn client_identification_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Namespace", HeaderValue::from_static("pd3"));
    headers.insert("Game-Client-Version", HeaderValue::from_static("1.0.0.0"));
    headers.insert("Accelbyte-Sdk-Version", HeaderValue::from_static("21.0.3"));
    headers.insert("Accelbyte-Oss-Version", HeaderValue::from_static("0.8.11"));
    headers
}

/// Build the HTTP client for all platform traffic.
///
/// Cookie store is disabled: the token cookies are attached manually per
/// request from the active session rather than captured from responses.
pub fn build_platform_client() -> Result<Client, Error> {
    Client::builder()
        .cookie_store(false)
        .user_agent(GAME_USER_AGENT)
        .default_headers(client_identification_headers())
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::Transport(format!("failed to create platform HTTP client: {}", e)))
}
