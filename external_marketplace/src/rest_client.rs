//! Minimal hyper-based REST client and query-string builder, trimmed from
//! the exchange connector's original multi-exchange rest layer down to what
//! a single signed HTTP API needs: GET/POST, status-based error handling,
//! and a `UriBuilder` that also doubles as the HMAC signing buffer.

use std::fmt;
use std::fmt::{Debug, Display, Formatter, Write};

use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use uuid::Uuid;

#[derive(Eq, PartialEq, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    pub content: String,
}

impl Debug for RestResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let cut = if self.content.len() > 1500 {
            &self.content[..1500]
        } else {
            &self.content
        };
        write!(f, "status: {:?} content: {}", self.status, cut)
    }
}

pub struct RestClient {
    client: Client<HttpsConnector<HttpConnector>>,
}

impl Default for RestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RestClient {
    pub fn new() -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_only()
            .enable_http1()
            .build();
        Self {
            client: Client::builder().build::<_, Body>(https),
        }
    }

    pub async fn get(&self, uri: Uri) -> Result<RestResponse> {
        let request_id = Uuid::new_v4();
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(hyper::header::CONNECTION, "keep-alive")
            .body(Body::empty())
            .with_context(|| format!("building GET request {request_id}"))?;
        self.send(req, request_id).await
    }

    pub async fn post(&self, uri: Uri) -> Result<RestResponse> {
        let request_id = Uuid::new_v4();
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(hyper::header::CONNECTION, "keep-alive")
            .body(Body::empty())
            .with_context(|| format!("building POST request {request_id}"))?;
        self.send(req, request_id).await
    }

    async fn send(&self, req: Request<Body>, request_id: Uuid) -> Result<RestResponse> {
        let response = self
            .client
            .request(req)
            .await
            .with_context(|| format!("sending request {request_id}"))?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .with_context(|| format!("reading response body, request_id {request_id}"))?;
        let content = String::from_utf8_lossy(&bytes).into_owned();

        log::trace!("marketplace response {request_id}: {status} {content}");

        Ok(RestResponse { status, content })
    }
}

pub type QueryKey = &'static str;

/// Accumulates a query string; the raw bytes written so far are also what
/// gets HMAC-signed (see `client::write_signature`).
pub struct UriBuilder {
    buffer: BytesMut,
    query_start: usize,
}

impl UriBuilder {
    pub fn new(path: &str) -> Self {
        let mut buf = BytesMut::with_capacity(256);
        buf.extend_from_slice(path.as_bytes());
        buf.put_u8(b'?');
        let query_start = buf.len();
        Self {
            buffer: buf,
            query_start,
        }
    }

    fn add_separator(&mut self) {
        if self.buffer.len() > self.query_start {
            self.buffer.put_u8(b'&');
        }
    }

    pub fn add_kv(&mut self, key: QueryKey, value: impl Display) {
        self.add_separator();
        self.buffer.extend_from_slice(key.as_bytes());
        self.buffer.put_u8(b'=');
        write!(self.buffer, "{value}").expect("writing query value");
    }

    pub fn ensure_free_size(&mut self, need: usize) {
        if self.buffer.remaining_mut() < need {
            self.buffer.reserve(need);
        }
    }

    pub fn query(&self) -> &[u8] {
        &self.buffer[self.query_start..]
    }

    pub fn build_uri(self, host: &str) -> Uri {
        let buffer = self.buffer.freeze();
        let path_and_query = if buffer.len() == self.query_start {
            buffer.slice(..self.query_start - 1)
        } else {
            buffer
        };

        Uri::builder()
            .scheme("https")
            .authority(host)
            .path_and_query(Bytes::from(path_and_query).to_vec())
            .build()
            .expect("building marketplace request uri")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_query_in_insertion_order() {
        let mut builder = UriBuilder::new("/v2/account");
        builder.add_kv("public_key", "abc");
        builder.add_kv("nonce", 42);
        assert_eq!(builder.query(), b"public_key=abc&nonce=42");
    }

    #[test]
    fn builds_uri_with_query() {
        let mut builder = UriBuilder::new("/v2/account");
        builder.add_kv("nonce", 1);
        let uri = builder.build_uri("marketplace.example");
        assert_eq!(
            uri,
            Uri::from_static("https://marketplace.example/v2/account?nonce=1")
        );
    }
}
