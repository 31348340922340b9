//! Minimal HTTP client abstraction shared across crates.

use std::future::Future;
use std::sync::Arc;

/// HTTP client trait for sending raw HTTP requests.
///
/// Everything network-facing in Marginalia goes through this seam, which
/// keeps the OAuth engine and the agent testable against canned responses.
#[trait_variant::make(Send)]
pub trait HttpClient {
    /// Send an HTTP request and return the response.
    fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = Result<http::Response<Vec<u8>>, crate::TransportError>>;
}

#[cfg(feature = "reqwest-client")]
impl HttpClient for reqwest::Client {
    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, crate::TransportError> {
        let (parts, body) = request.into_parts();

        let mut req = self.request(parts.method, parts.uri.to_string()).body(body);
        for (name, value) in parts.headers.iter() {
            req = req.header(name.as_str(), value.as_bytes());
        }

        let resp = req.send().await?;

        let mut builder = http::Response::builder().status(resp.status());
        for (name, value) in resp.headers().iter() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }
        let body = resp.bytes().await?.to_vec();

        builder
            .body(body)
            .map_err(|e| crate::TransportError::InvalidRequest(e.to_string()))
    }
}

impl<T: HttpClient + Sync> HttpClient for Arc<T> {
    fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = Result<http::Response<Vec<u8>>, crate::TransportError>> + Send {
        self.as_ref().send_http(request)
    }
}
