//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::transport::{HttpRequest, HttpResponse, Transport};
use crate::cache::key::normalize_path;
use crate::error::TransportError;

#[derive(Clone)]
enum Reply {
    Respond(u16, String),
    Fail,
}

/// Transport that answers from a per-route script. The last scripted reply
/// for a route repeats until replaced.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(String, String), VecDeque<Reply>>>,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
    delay: Mutex<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn route(method: &str, path: &str) -> (String, String) {
        (method.to_string(), normalize_path(path))
    }

    /// Replace the script for a route with a single repeating reply.
    pub fn respond(&self, method: &str, path: &str, status: u16, body: serde_json::Value) {
        let mut routes = self.routes.lock().unwrap();
        routes.insert(
            Self::route(method, path),
            VecDeque::from([Reply::Respond(status, body.to_string())]),
        );
    }

    /// Append a reply after the ones already scripted for a route.
    pub fn enqueue(&self, method: &str, path: &str, status: u16, body: serde_json::Value) {
        let mut routes = self.routes.lock().unwrap();
        routes
            .entry(Self::route(method, path))
            .or_default()
            .push_back(Reply::Respond(status, body.to_string()));
    }

    /// Make a route fail at the transport level.
    pub fn fail(&self, method: &str, path: &str) {
        let mut routes = self.routes.lock().unwrap();
        routes.insert(Self::route(method, path), VecDeque::from([Reply::Fail]));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, method: &str, path: &str) -> usize {
        let path = normalize_path(path);
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == method && normalize_path(&r.path) == path)
            .count()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn next_reply(&self, method: &str, path: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        let Some(queue) = routes.get_mut(&Self::route(method, path)) else {
            return Reply::Respond(404, r#"{"error":{"message":"no script"}}"#.to_string());
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(request.method.as_str(), &request.path) {
            Reply::Respond(status, body) => Ok(HttpResponse::new(status, body)),
            Reply::Fail => Err(TransportError::Connect("connection refused".to_string())),
        }
    }
}
