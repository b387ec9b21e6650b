//! Following a build's console output through the progressive text endpoint.
//!
//! Every poll asks for the text after byte `start`. Jenkins answers with the new text plus two
//! headers: `X-Text-Size`, the offset to ask for next, and `X-More-Data`, which stays `true`
//! while the build is still producing output.

use crate::error::{Error, Result};
use crate::session::Session;
use crate::transport::{Request, Transport};
use futures::stream::{self, Stream};
use log::*;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

const TEXT_SIZE_HEADER: &str = "X-Text-Size";
const MORE_DATA_HEADER: &str = "X-More-Data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStreamConfig {
    /// Pause between two polls
    pub poll_interval: Duration,
    /// Consecutive unsuccessful responses tolerated before giving up. `None` keeps polling
    /// through any number of them.
    pub max_failed_polls: Option<u32>,
}

impl Default for LogStreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_failed_polls: None,
        }
    }
}

/// Position in a build's console output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCursor {
    offset: u64,
    more_data: bool,
}

impl LogCursor {
    pub fn at(offset: u64) -> Self {
        Self {
            offset,
            more_data: true,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn has_more(&self) -> bool {
        self.more_data
    }

    /// Move past a received chunk. The offset never goes backwards.
    pub fn advance(&mut self, next_offset: Option<u64>, more_data: bool) {
        if let Some(next_offset) = next_offset {
            self.offset = self.offset.max(next_offset);
        }
        self.more_data = more_data;
    }
}

impl Default for LogCursor {
    fn default() -> Self {
        Self::at(0)
    }
}

struct LogPoll<T> {
    transport: Arc<T>,
    url: String,
    cursor: LogCursor,
    config: LogStreamConfig,
    polled: bool,
    failed_polls: u32,
}

impl<T: Transport> LogPoll<T> {
    /// Poll until there is text to hand out or the log is complete
    async fn next_chunk(&mut self) -> Result<Option<String>> {
        while self.cursor.has_more() {
            if self.polled {
                tokio::time::sleep(self.config.poll_interval.max(MIN_POLL_INTERVAL)).await;
            }
            self.polled = true;

            let request = Request::get(&self.url).query("start", self.cursor.offset());
            let response = self.transport.send(request).await?;
            if !response.is_success() {
                self.failed_polls += 1;
                debug!(
                    "{} answered {} ({} in a row)",
                    self.url, response.status, self.failed_polls
                );
                if self
                    .config
                    .max_failed_polls
                    .map_or(false, |max| self.failed_polls >= max)
                {
                    return Err(Error::Status {
                        url: self.url.clone(),
                        status: response.status,
                    });
                }
                continue;
            }
            self.failed_polls = 0;

            let next_offset = response
                .header(TEXT_SIZE_HEADER)
                .and_then(|size| size.trim().parse().ok());
            let more_data = response
                .header(MORE_DATA_HEADER)
                .map_or(false, |more| more.trim().eq_ignore_ascii_case("true"));
            self.cursor.advance(next_offset, more_data);
            trace!("{:?}", self.cursor);
            if !response.body.is_empty() {
                return Ok(Some(response.body));
            }
        }
        Ok(None)
    }
}

/// Stream the console output of `build` of `job` from the beginning
pub fn stream_log<T: Transport>(
    session: &Session<T>,
    job: &str,
    build: &str,
    config: LogStreamConfig,
) -> impl Stream<Item = Result<String>> {
    stream_log_from(session, job, build, 0, config)
}

/// Stream the console output of `build` of `job` starting at byte `offset`.
///
/// Chunks are yielded in server order without overlap. The stream ends once the server reports
/// no more data, or with an error if the server cannot be reached.
pub fn stream_log_from<T: Transport>(
    session: &Session<T>,
    job: &str,
    build: &str,
    offset: u64,
    config: LogStreamConfig,
) -> impl Stream<Item = Result<String>> {
    let poll = LogPoll {
        transport: Arc::clone(session.transport()),
        url: session.job_endpoint(job, &[build, "logText", "progressiveText"]),
        cursor: LogCursor::at(offset),
        config,
        polled: false,
        failed_polls: 0,
    };
    stream::try_unfold(poll, |mut poll| async move {
        Ok::<_, Error>(poll.next_chunk().await?.map(|chunk| (chunk, poll)))
    })
}
