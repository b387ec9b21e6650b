use crate::error::{Error, Result};
use crate::transport::{Request, Transport};
use log::*;
use serde::{Deserialize, Serialize};

/// Header Jenkins expects when CSRF protection is turned off
pub const DISABLED_CRUMB_HEADER: &str = "Jenkins-Crumb";

const CRUMB_XPATH: &str = r#"concat(//crumbRequestField,":",//crumb)"#;

/// CSRF protection token that has to accompany every mutating request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Crumb {
    pub header: String,
    pub value: String,
}

impl Crumb {
    /// Stand-in used when the server has no crumb issuer. Attaching it is a no-op.
    pub fn disabled() -> Self {
        Self {
            header: DISABLED_CRUMB_HEADER.to_string(),
            value: String::new(),
        }
    }
}

/// Split a `header:value` crumb issuer response on its first colon
pub fn parse_crumb(body: &str) -> Result<Crumb> {
    let body = body.trim();
    match body.split_once(':') {
        Some((header, value)) if !header.is_empty() => Ok(Crumb {
            header: header.to_string(),
            value: value.to_string(),
        }),
        _ => Err(Error::MalformedCrumb(body.to_string())),
    }
}

/// Ask the crumb issuer of `host` for a crumb
pub async fn fetch_crumb<T: Transport + ?Sized>(transport: &T, host: &str) -> Result<Crumb> {
    let url = format!("{}/crumbIssuer/api/xml", host.trim_end_matches('/'));
    let response = transport
        .send(Request::get(&url).query("xpath", CRUMB_XPATH))
        .await?;
    match response.status {
        200 => parse_crumb(&response.body),
        404 => {
            info!("{} has CSRF protection disabled", host);
            Ok(Crumb::disabled())
        }
        status => {
            warn!("Crumb issuer at {} answered {}", url, status);
            Err(Error::CrumbUnavailable { status })
        }
    }
}
