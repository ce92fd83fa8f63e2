use std::{sync::OnceLock, time::Duration};

use axum::http;
use reqwest::Client;

/// Timeout for submissions, status checks and uploads
pub(crate) const SHORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for synchronous generation calls and result downloads
pub(crate) const LONG_TIMEOUT: Duration = Duration::from_secs(600);

/// Common HTTP client to reuse connections across drivers
///
/// The client-wide timeout is the long one; small calls set
/// [`SHORT_TIMEOUT`] per request.
pub(crate) fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            let mut headers = http::HeaderMap::new();
            headers.insert(http::header::CONNECTION, http::HeaderValue::from_static("keep-alive"));

            Client::builder()
                .timeout(LONG_TIMEOUT)
                .connect_timeout(Duration::from_secs(10))
                .pool_idle_timeout(Some(Duration::from_secs(30)))
                .tcp_nodelay(true)
                .tcp_keepalive(Some(Duration::from_secs(60)))
                .default_headers(headers)
                .build()
                .expect("Failed to build default HTTP client")
        })
        .clone()
}
