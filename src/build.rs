//! Triggering builds and waiting for Jenkins to schedule them.
//!
//! A build request is first parked in the server's queue. Only once an executor picks it up does
//! the queue item learn the URL of the concrete build, so after submitting we poll the queue item
//! until `executable.url` shows up or the deadline passes.

use crate::crumb::Crumb;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::transport::{Request, Transport};
use log::*;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use url::Url;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

/// How often to ask about a queue item and for how long
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    pub poll_interval: Duration,
    pub deadline: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The build was accepted and has been assigned a build URL
    Queued { queue_url: String, build_url: String },
    /// The server refused the build request
    Rejected { status: u16 },
}

/// A build request waiting in the server's queue
#[derive(Debug, Clone)]
pub struct QueueItem {
    location: String,
    build_url: Option<String>,
}

impl QueueItem {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            build_url: None,
        }
    }

    /// JSON API of the queue item. Jenkins hands out locations with a trailing slash but we don't
    /// rely on it.
    pub fn api_url(&self) -> Result<String> {
        let mut location = self.location.clone();
        if !location.ends_with('/') {
            location.push('/');
        }
        Url::parse(&location)
            .and_then(|url| url.join("api/json"))
            .map(String::from)
            .map_err(|e| Error::invalid_url(&self.location, e))
    }

    /// Record the build URL. Only the first call has an effect.
    pub fn resolve(&mut self, build_url: String) -> &str {
        self.build_url.get_or_insert(build_url)
    }

    pub fn build_url(&self) -> Option<&str> {
        self.build_url.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.build_url.is_some()
    }
}

#[derive(Deserialize)]
struct QueueItemState {
    executable: Option<Executable>,
}

#[derive(Deserialize)]
struct Executable {
    url: Option<String>,
}

fn executable_url(body: &str) -> serde_json::Result<Option<String>> {
    let state: QueueItemState = serde_json::from_str(body)?;
    Ok(state.executable.and_then(|executable| executable.url))
}

/// Polls queue items until they turn into builds
pub struct QueueResolver<T> {
    transport: Arc<T>,
    crumb: Crumb,
    config: ResolverConfig,
}

impl<T: Transport + 'static> QueueResolver<T> {
    pub fn new(transport: Arc<T>, crumb: Crumb, config: ResolverConfig) -> Self {
        Self {
            transport,
            crumb,
            config,
        }
    }

    /// Wait for the queue item at `location` to be assigned a build and return the build URL.
    ///
    /// Polling happens on a background task that reports back through a oneshot channel, so at
    /// most one result is ever delivered. The task is aborted when this future completes or is
    /// dropped, whether the item resolved, polling failed, the deadline passed or the caller gave
    /// up.
    pub async fn resolve(&self, location: &str) -> Result<String> {
        let item = QueueItem::new(location);
        let api_url = item.api_url()?;
        let (tx, rx) = oneshot::channel();
        let _poller = AbortOnDrop(tokio::spawn(wait_for_build(
            Arc::clone(&self.transport),
            self.crumb.clone(),
            api_url,
            self.config.poll_interval,
            item,
            tx,
        )));

        match time::timeout(self.config.deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::transport(location, "queue poller stopped unexpectedly")),
            Err(_) => {
                warn!("Timer expired waiting for {}", location);
                Err(Error::QueueTimeout {
                    queue_url: location.to_string(),
                    waited: self.config.deadline,
                })
            }
        }
    }
}

/// Aborts the wrapped task once dropped
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn wait_for_build<T: Transport>(
    transport: Arc<T>,
    crumb: Crumb,
    api_url: String,
    poll_interval: Duration,
    mut item: QueueItem,
    tx: oneshot::Sender<Result<String>>,
) {
    let poll_interval = poll_interval.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let result = loop {
        ticker.tick().await;
        let request = Request::post(&api_url).header(&crumb.header, &crumb.value);
        let response = match transport.send(request).await {
            Ok(response) => response,
            Err(e) => break Err(e),
        };
        debug!("{} answered {}", api_url, response.status);
        if response.status != 200 {
            continue;
        }
        match executable_url(&response.body) {
            Ok(Some(build_url)) => break Ok(item.resolve(build_url).to_string()),
            Ok(None) => trace!("{} not scheduled yet", api_url),
            Err(e) => break Err(Error::decode(&api_url, e)),
        }
    };
    // Nobody is listening anymore if the deadline already passed
    tx.send(result).ok();
}

/// Trigger a build of `job` and wait until Jenkins has scheduled it.
///
/// A refused request is an expected outcome and comes back as [`BuildOutcome::Rejected`].
pub async fn trigger_build<T: Transport + 'static>(
    session: &Session<T>,
    job: &str,
    config: ResolverConfig,
) -> Result<BuildOutcome> {
    let crumb = session.crumb().await?.clone();
    let url = session.job_endpoint(job, &["build"]);
    let response = session
        .transport()
        .send(Request::post(&url).header(&crumb.header, &crumb.value))
        .await?;
    info!("{} answered {}", url, response.status);
    if response.status != 201 {
        return Ok(BuildOutcome::Rejected {
            status: response.status,
        });
    }

    let queue_url = response
        .header("Location")
        .ok_or_else(|| Error::MissingLocation {
            job: job.to_string(),
        })?
        .to_string();
    info!("Build of {} queued at {}", job, queue_url);
    let build_url = QueueResolver::new(Arc::clone(session.transport()), crumb, config)
        .resolve(&queue_url)
        .await?;
    Ok(BuildOutcome::Queued {
        queue_url,
        build_url,
    })
}

/// Extract the build number from a build URL such as `http://host/job/demo/5/`
pub fn parse_build_number(build_url: &str) -> Result<u32> {
    static URL_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^(.*)/(\d+)(?:/)?(?:display/redirect)?$").unwrap());

    URL_REGEX
        .captures(build_url)
        .and_then(|captures| captures[2].parse().ok())
        .ok_or_else(|| Error::NoBuildNumber(build_url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{fake::FakeTransport, Method, Response};

    const BUILD: &str = "http://host/job/demo/build";
    const QUEUE: &str = "http://host/queue/item/7/";
    const QUEUE_API: &str = "http://host/queue/item/7/api/json";

    fn session(transport: &FakeTransport) -> Session<FakeTransport> {
        Session::new("http://host", transport.clone())
            .unwrap()
            .with_crumb(Crumb {
                header: "Jenkins-Crumb".into(),
                value: "abc123".into(),
            })
    }

    fn accepted() -> Response {
        Response::new(201, "").with_header("Location", QUEUE)
    }

    fn scheduled(url: &str) -> Response {
        Response::new(200, format!(r#"{{"executable":{{"number":5,"url":"{}"}}}}"#, url))
    }

    #[test]
    fn queue_api_url() {
        assert_eq!(QueueItem::new(QUEUE).api_url().unwrap(), QUEUE_API);
        assert_eq!(
            QueueItem::new("http://host/queue/item/7").api_url().unwrap(),
            QUEUE_API
        );
        assert!(QueueItem::new("queue/item/7").api_url().is_err());
    }

    #[test]
    fn queue_item_resolves_once() {
        let mut item = QueueItem::new(QUEUE);
        assert!(!item.is_resolved());
        assert_eq!(item.resolve("http://host/job/demo/5/".into()), "http://host/job/demo/5/");
        assert_eq!(item.resolve("http://host/job/demo/6/".into()), "http://host/job/demo/5/");
        assert_eq!(item.build_url(), Some("http://host/job/demo/5/"));
    }

    #[test]
    fn executable_url_extraction() {
        assert_eq!(executable_url("{}").unwrap(), None);
        assert_eq!(executable_url(r#"{"executable":null}"#).unwrap(), None);
        assert_eq!(
            executable_url(r#"{"blocked":false,"executable":{"url":"http://host/job/demo/5/"}}"#)
                .unwrap()
                .as_deref(),
            Some("http://host/job/demo/5/")
        );
        assert!(executable_url("<html>").is_err());
    }

    #[test]
    fn build_numbers() {
        assert_eq!(parse_build_number("http://host/job/demo/5/").unwrap(), 5);
        assert_eq!(parse_build_number("http://host/job/demo/123").unwrap(), 123);
        assert_eq!(
            parse_build_number("http://host/job/demo/42/display/redirect").unwrap(),
            42
        );
        assert!(matches!(
            parse_build_number("http://host/job/demo/"),
            Err(Error::NoBuildNumber(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_after_the_build_is_scheduled() {
        let transport = FakeTransport::new();
        transport
            .reply(Method::Post, BUILD, accepted())
            .reply(Method::Post, QUEUE_API, Response::new(200, "{}"))
            .reply(Method::Post, QUEUE_API, Response::new(200, "{}"))
            .reply(Method::Post, QUEUE_API, scheduled("http://host/job/demo/5/"));

        let start = Instant::now();
        let outcome = trigger_build(&session(&transport), "demo", ResolverConfig::default())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            BuildOutcome::Queued {
                queue_url: QUEUE.into(),
                build_url: "http://host/job/demo/5/".into(),
            }
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(20));

        let polls = transport.requests_to(QUEUE_API);
        assert_eq!(polls.len(), 3);
        assert!(polls.iter().all(|poll| poll.method == Method::Post));
        assert_eq!(
            polls[0].headers,
            vec![("Jenkins-Crumb".to_string(), "abc123".to_string())]
        );
        let build = &transport.requests_to(BUILD)[0];
        assert_eq!(build.headers, polls[0].headers);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_build_is_not_polled() {
        let transport = FakeTransport::new();
        transport.reply(Method::Post, BUILD, Response::new(403, "No valid crumb"));

        let outcome = trigger_build(&session(&transport), "demo", ResolverConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Rejected { status: 403 });
        assert!(transport.requests_to(QUEUE_API).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_without_location() {
        let transport = FakeTransport::new();
        transport.reply(Method::Post, BUILD, Response::new(201, ""));
        assert!(matches!(
            trigger_build(&session(&transport), "demo", ResolverConfig::default()).await,
            Err(Error::MissingLocation { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn first_build_url_wins() {
        let transport = FakeTransport::new();
        transport
            .reply(Method::Post, QUEUE_API, scheduled("http://host/job/demo/5/"))
            .reply(Method::Post, QUEUE_API, scheduled("http://host/job/demo/6/"));
        let resolver = QueueResolver::new(
            Arc::new(transport.clone()),
            Crumb::disabled(),
            ResolverConfig::default(),
        );

        assert_eq!(resolver.resolve(QUEUE).await.unwrap(), "http://host/job/demo/5/");
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.requests_to(QUEUE_API).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_stops_polling() {
        let transport = FakeTransport::new();
        transport.reply(Method::Post, QUEUE_API, Response::new(200, "{}"));
        let config = ResolverConfig::default();
        let resolver = QueueResolver::new(Arc::new(transport.clone()), Crumb::disabled(), config);

        let start = Instant::now();
        let err = resolver.resolve(QUEUE).await.unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, Error::QueueTimeout { .. }));
        assert!(elapsed >= config.deadline);
        assert!(elapsed < config.deadline + config.poll_interval);

        let polls = transport.requests_to(QUEUE_API).len();
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.requests_to(QUEUE_API).len(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_resolve_stops_polling() {
        let transport = FakeTransport::new();
        transport.reply(Method::Post, QUEUE_API, Response::new(200, "{}"));
        let resolver = QueueResolver::new(
            Arc::new(transport.clone()),
            Crumb::disabled(),
            ResolverConfig::default(),
        );

        let gave_up = time::timeout(Duration::from_secs(12), resolver.resolve(QUEUE)).await;
        assert!(gave_up.is_err());
        let polls = transport.requests_to(QUEUE_API).len();
        assert_eq!(polls, 2);

        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.requests_to(QUEUE_API).len(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_interval_and_deadline() {
        let transport = FakeTransport::new();
        transport.reply(Method::Post, QUEUE_API, Response::new(200, "{}"));
        let config = ResolverConfig {
            poll_interval: Duration::from_secs(1),
            deadline: Duration::from_secs(10),
        };
        let resolver = QueueResolver::new(Arc::new(transport.clone()), Crumb::disabled(), config);

        let err = resolver.resolve(QUEUE).await.unwrap_err();
        assert!(matches!(
            err,
            Error::QueueTimeout { waited, .. } if waited == Duration::from_secs(10)
        ));
        let polls = transport.requests_to(QUEUE_API).len();
        assert!((9..=10).contains(&polls), "{} polls", polls);
    }

    #[tokio::test(start_paused = true)]
    async fn unsuccessful_polls_are_ignored() {
        let transport = FakeTransport::new();
        transport
            .reply(Method::Post, QUEUE_API, Response::new(404, "Not Found"))
            .reply(Method::Post, QUEUE_API, Response::new(500, "oops"))
            .reply(Method::Post, QUEUE_API, scheduled("http://host/job/demo/9/"));
        let resolver = QueueResolver::new(
            Arc::new(transport.clone()),
            Crumb::disabled(),
            ResolverConfig::default(),
        );
        assert_eq!(resolver.resolve(QUEUE).await.unwrap(), "http://host/job/demo/9/");
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_poll_fails() {
        let transport = FakeTransport::new();
        transport.reply(Method::Post, QUEUE_API, Response::new(200, "<html>"));
        let resolver = QueueResolver::new(
            Arc::new(transport.clone()),
            Crumb::disabled(),
            ResolverConfig::default(),
        );
        assert!(matches!(
            resolver.resolve(QUEUE).await,
            Err(Error::Decode { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_queue_fails() {
        let transport = FakeTransport::new();
        transport.fail(Method::Post, QUEUE_API, "connection reset");
        let resolver = QueueResolver::new(
            Arc::new(transport.clone()),
            Crumb::disabled(),
            ResolverConfig::default(),
        );
        assert!(matches!(
            resolver.resolve(QUEUE).await,
            Err(Error::Transport { .. })
        ));
        assert_eq!(transport.requests_to(QUEUE_API).len(), 1);
    }
}
