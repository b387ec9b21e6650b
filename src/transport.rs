//! Minimal HTTP plumbing shared by every Jenkins call.
//!
//! Status codes are handed back as-is; deciding what a 404 or a 201 means is up to the caller.

use crate::error::{Error, Result};
use async_trait::async_trait;
use log::*;

#[cfg(test)]
pub(crate) mod fake;

#[derive(Debug, Clone)]
/// Authentication information
pub struct Auth {
    /// Username
    username: String,
    /// Password or API token
    password: String,
}

impl Auth {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url.into())
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url.into())
    }

    fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can carry a [`Request`] to the server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request. Only failures to complete the exchange are errors; any HTTP status is a
    /// valid [`Response`].
    async fn send(&self, request: Request) -> Result<Response>;
}

/// [`Transport`] over reqwest, authenticating every request with HTTP basic auth
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    credentials: Auth,
}

impl HttpTransport {
    pub fn new(credentials: Auth) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .http1_title_case_headers()
            .build()
            .map_err(|e| Error::transport("<client>", e))?;
        Ok(Self {
            http_client,
            credentials,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };
        debug!("{:?} {}", request.method, request.url);
        let mut builder = self
            .http_client
            .request(method, &request.url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.method == Method::Post {
            builder = builder.body("");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::transport(&request.url, e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(&request.url, e))?;
        debug!("{} answered {}", request.url, status);
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
