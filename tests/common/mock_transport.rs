use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

use prepper_client::transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ProgressSink, TransportError,
    UploadRequest,
};

/// One scripted outcome for a request.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(u16, Value),
    Raw(u16, String),
    Fail(TransportError),
    /// Wait, then answer with the inner reply
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn ok(value: Value) -> Self {
        Self::Json(200, value)
    }

    pub fn status(status: u16, value: Value) -> Self {
        Self::Json(status, value)
    }

    pub fn refused() -> Self {
        Self::Fail(TransportError::ConnectionRefused("connection refused".into()))
    }

    pub fn after(delay: Duration, reply: Reply) -> Self {
        Self::Delayed(delay, Box::new(reply))
    }
}

#[derive(Debug)]
struct Route {
    method: HttpMethod,
    path: String,
    replies: VecDeque<Reply>,
}

/// Scripted backend keyed by method and path.
///
/// Each route answers with its replies in order; the last reply repeats once
/// the rest are used up. Requests for unknown routes get a 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    upload_replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
    uploads: Mutex<Vec<UploadRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script replies for `method path`, replacing any earlier script.
    pub fn on(&self, method: HttpMethod, path: &str, replies: Vec<Reply>) -> &Self {
        let mut routes = self.routes.lock();
        routes.retain(|route| !(route.method == method && route.path == path));
        routes.push(Route {
            method,
            path: path.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub fn on_get(&self, path: &str, replies: Vec<Reply>) -> &Self {
        self.on(HttpMethod::Get, path, replies)
    }

    pub fn on_post(&self, path: &str, replies: Vec<Reply>) -> &Self {
        self.on(HttpMethod::Post, path, replies)
    }

    pub fn on_delete(&self, path: &str, replies: Vec<Reply>) -> &Self {
        self.on(HttpMethod::Delete, path, replies)
    }

    pub fn on_upload(&self, replies: Vec<Reply>) -> &Self {
        *self.upload_replies.lock() = replies.into();
        self
    }

    /// Number of requests sent to `method path`.
    pub fn count(&self, method: HttpMethod, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.method == method && path_of(&request.url) == path)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().len()
    }

    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().clone()
    }

    fn next_reply(&self, method: HttpMethod, path: &str) -> Reply {
        let mut routes = self.routes.lock();
        let Some(route) = routes
            .iter_mut()
            .find(|route| route.method == method && route.path == path)
        else {
            return Reply::status(404, serde_json::json!({"error": "no such route"}));
        };
        if route.replies.len() > 1 {
            route.replies.pop_front().unwrap_or_else(|| Reply::refused())
        } else {
            route.replies.front().cloned().unwrap_or_else(|| Reply::refused())
        }
    }
}

fn path_of(url: &str) -> String {
    url::Url::parse(url)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

async fn resolve(reply: Reply) -> Result<HttpResponse, TransportError> {
    let mut reply = reply;
    loop {
        match reply {
            Reply::Json(status, value) => return Ok(HttpResponse::json(status, &value)),
            Reply::Raw(status, body) => return Ok(HttpResponse::new(status, body)),
            Reply::Fail(error) => return Err(error),
            Reply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let reply = self.next_reply(request.method, &path_of(&request.url));
        self.requests.lock().push(request);
        resolve(reply).await
    }

    async fn upload(
        &self,
        request: UploadRequest,
        progress: ProgressSink,
    ) -> Result<HttpResponse, TransportError> {
        let reply = {
            let mut replies = self.upload_replies.lock();
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        }
        .unwrap_or_else(|| Reply::status(500, serde_json::json!({"error": "upload not scripted"})));
        self.uploads.lock().push(request);

        progress(50);
        let response = resolve(reply).await;
        if response.as_ref().is_ok_and(HttpResponse::is_success) {
            progress(100);
        }
        response
    }
}
