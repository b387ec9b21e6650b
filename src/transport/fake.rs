//! Scripted transport for tests

use super::{Method, Request, Response, Transport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Reply {
    Response(Response),
    Unreachable(String),
}

#[derive(Default)]
struct FakeState {
    routes: HashMap<(Method, String), VecDeque<Reply>>,
    requests: Vec<Request>,
}

/// Replies to each (method, url) with a queue of scripted responses. The last scripted reply
/// repeats forever; unknown routes answer 404.
#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, method: Method, url: &str, response: Response) -> &Self {
        self.push(method, url, Reply::Response(response))
    }

    pub fn fail(&self, method: Method, url: &str, message: &str) -> &Self {
        self.push(method, url, Reply::Unreachable(message.to_string()))
    }

    fn push(&self, method: Method, url: &str, reply: Reply) -> &Self {
        self.inner
            .lock()
            .routes
            .entry((method, url.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    /// All requests seen so far
    pub fn requests(&self) -> Vec<Request> {
        self.inner.lock().requests.clone()
    }

    /// Requests seen for one url
    pub fn requests_to(&self, url: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|request| request.url == url)
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let mut state = self.inner.lock();
        state.requests.push(request.clone());
        let reply = match state.routes.get_mut(&(request.method, request.url.clone())) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match reply {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Unreachable(message)) => Err(Error::transport(&request.url, message)),
            None => Ok(Response::new(404, "")),
        }
    }
}
