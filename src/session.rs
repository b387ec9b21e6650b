use crate::config::Profile;
use crate::crumb::{self, Crumb};
use crate::error::{Error, Result};
use crate::transport::{Auth, HttpTransport, Transport};
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

/// Connection to one Jenkins server for the lifetime of a single command
pub struct Session<T> {
    base_url: Url,
    transport: Arc<T>,
    crumb: OnceCell<Crumb>,
}

impl<T: Transport> Session<T> {
    pub fn new(base_url: &str, transport: T) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| Error::invalid_url(base_url, e))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::invalid_url(
                base_url.as_str(),
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }
        Ok(Self {
            base_url,
            transport: Arc::new(transport),
            crumb: OnceCell::new(),
        })
    }

    /// Use a crumb obtained earlier instead of asking the crumb issuer
    pub fn with_crumb(mut self, crumb: Crumb) -> Self {
        self.crumb = OnceCell::from(crumb);
        self
    }

    /// The session's crumb, fetched from the server on first use
    pub async fn crumb(&self) -> Result<&Crumb> {
        self.crumb
            .get_or_try_init(|| crumb::fetch_crumb(self.transport.as_ref(), self.host()))
            .await
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Base URL without a trailing slash
    pub fn host(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// URL of `segments` below the base URL. Each segment is percent-encoded on its own, so a job
    /// name can never escape its path segment.
    pub fn endpoint(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.to_string()
    }

    pub fn job_endpoint(&self, job: &str, segments: &[&str]) -> String {
        let mut all = vec!["job", job];
        all.extend_from_slice(segments);
        self.endpoint(&all)
    }
}

impl Session<HttpTransport> {
    /// Open a session with stored credentials. A crumb saved in the profile is reused as-is.
    pub fn from_profile(profile: &Profile) -> Result<Self> {
        let transport =
            HttpTransport::new(Auth::new(profile.user.clone(), profile.token.clone()))?;
        let session = Self::new(&profile.host, transport)?;
        Ok(match profile.crumb() {
            Some(crumb) => session.with_crumb(crumb),
            None => session,
        })
    }
}
