//! Blocking client facade.
//!
//! Every `send` runs the engine future inside a [`BlockingCall`], so the
//! calling thread stays responsive to its cancellation token, the request
//! timeout, and interrupts aimed at it.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use bodyline_bridge::{BlockingCall, CancellationToken, UploadAbortHandle, UploadStream};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use http::{Method, Uri};
use serde::Serialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::engine::Transport;
use crate::error::{ClientError, ClientResult};
use crate::hyper_engine::HyperTransport;
use crate::request::{Body, Request};
use crate::response::Response;

static DEFAULT_CLIENT: LazyLock<Client> = LazyLock::new(Client::new);

/// A shareable HTTP client. Clones use the same engine and pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let transport = HyperTransport::new(&config);
        Self::with_transport(config, transport)
    }

    /// A client driving a custom engine.
    pub fn with_transport(config: ClientConfig, transport: impl Transport) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport: Arc::new(transport),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// An upload sized by the configured `upload_capacity`.
    pub fn upload_stream(&self) -> ClientResult<UploadStream> {
        Ok(UploadStream::new(self.inner.config.upload_capacity)?)
    }

    pub fn get(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    pub fn head(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    pub fn request(&self, method: Method, url: impl AsRef<str>) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            request: parse_url(url.as_ref()).map(|uri| Request::new(method, uri)),
            token: None,
            upload: None,
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn parse_url(url: &str) -> ClientResult<Uri> {
    let uri: Uri = url
        .parse()
        .map_err(|e| ClientError::Builder(format!("invalid url `{url}`: {e}")))?;
    match uri.scheme_str() {
        Some("http") if uri.host().is_some() => Ok(uri),
        Some("http") => Err(ClientError::Builder(format!("url `{url}` has no host"))),
        Some(scheme) => Err(ClientError::Builder(format!("unsupported url scheme `{scheme}`"))),
        None => Err(ClientError::Builder(format!("url `{url}` is not absolute"))),
    }
}

/// A request under construction. Errors are deferred to [`send`](Self::send).
#[must_use = "a request does nothing until sent"]
pub struct RequestBuilder {
    client: Client,
    request: ClientResult<Request>,
    token: Option<CancellationToken>,
    upload: Option<UploadAbortHandle>,
}

impl RequestBuilder {
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        if self.request.is_err() {
            return self;
        }
        let name: Result<HeaderName, http::Error> = HeaderName::try_from(name).map_err(Into::into);
        let value: Result<HeaderValue, http::Error> =
            HeaderValue::try_from(value).map_err(Into::into);
        match (name, value) {
            (Ok(name), Ok(value)) => {
                if let Ok(request) = &mut self.request {
                    request.headers.append(name, value);
                }
                self
            }
            (Err(err), _) | (_, Err(err)) => self.fail(ClientError::Builder(err.to_string())),
        }
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        if let Ok(request) = &mut self.request {
            request.headers.extend(headers);
        }
        self
    }

    /// Deadline for receiving the response head, overriding the client's.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        if let Ok(request) = &mut self.request {
            request.timeout = Some(timeout);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        if let Ok(request) = &mut self.request {
            request.body = Body::Bytes(body.into());
        }
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.default_content_type("text/plain; charset=utf-8")
            .body(text.into())
    }

    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => self.default_content_type("application/json").body(body),
            Err(err) => self.fail(ClientError::Builder(err.to_string())),
        }
    }

    /// Send the body from `upload`, which producers keep pushing into
    /// while the request is in flight.
    ///
    /// If the request is abandoned (timeout, cancel, interrupt), the upload
    /// is aborted so its producers stop.
    pub fn stream(mut self, upload: &UploadStream) -> Self {
        if self.request.is_err() {
            return self;
        }
        match upload.take_source() {
            Ok(source) => {
                self.upload = Some(source.abort_handle());
                if let Ok(request) = &mut self.request {
                    request.body = Body::Stream(source);
                }
            }
            Err(err) => self.request = Err(err.into()),
        }
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Send the request and block until the response head arrives.
    pub fn send(self) -> ClientResult<Response> {
        let RequestBuilder {
            client,
            request,
            token,
            upload,
        } = self;
        let mut request = request?;
        let config = client.config();

        for (name, value) in &config.default_headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        if !request.headers.contains_key(USER_AGENT) {
            let agent = HeaderValue::from_str(&config.user_agent)
                .map_err(|e| ClientError::Config(format!("user_agent: {e}")))?;
            request.headers.insert(USER_AGENT, agent);
        }

        let method = request.method.clone();
        let uri = request.uri.clone();
        let timeout = request.timeout.or(config.timeout);
        let future = client
            .inner
            .transport
            .execute(request, config.download_capacity);

        let mut call = BlockingCall::new("send request")
            .timeout(timeout)
            .cancel_token(token.clone());
        if let Some(upload) = upload {
            call = call.on_release(move |err| {
                upload.abort(ClientError::from(err.clone()).to_string());
            });
        }

        let mut response = call.run(future)??;
        debug!(%method, %uri, status = %response.status(), "request completed");
        response.set_read_timeout(config.read_timeout);
        response.set_cancel_token(token);
        Ok(response)
    }

    fn default_content_type(mut self, value: &'static str) -> Self {
        if let Ok(request) = &mut self.request {
            if !request.headers.contains_key(CONTENT_TYPE) {
                request
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static(value));
            }
        }
        self
    }

    fn fail(mut self, err: ClientError) -> Self {
        self.request = Err(err);
        self
    }
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// `GET url` with the shared default client.
pub fn get(url: impl AsRef<str>) -> ClientResult<Response> {
    DEFAULT_CLIENT.get(url).send()
}

/// `POST url` with `body` using the shared default client.
pub fn post(url: impl AsRef<str>, body: impl Into<Bytes>) -> ClientResult<Response> {
    DEFAULT_CLIENT.post(url).body(body).send()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{TransferReport, TransferWatch};
    use bodyline_bridge::DownloadStream;
    use futures_util::future::BoxFuture;
    use std::sync::Mutex;

    /// Engine double that records request heads and answers with an
    /// empty body. Requests to `/hang` never complete.
    #[derive(Clone, Default)]
    struct Recorded {
        seen: Arc<Mutex<Vec<(Method, Uri, HeaderMap)>>>,
    }

    impl Transport for Recorded {
        fn execute(
            &self,
            request: Request,
            sink_capacity: usize,
        ) -> BoxFuture<'static, ClientResult<Response>> {
            self.seen.lock().unwrap().push((
                request.method.clone(),
                request.uri.clone(),
                request.headers.clone(),
            ));
            Box::pin(async move {
                if request.uri.path() == "/hang" {
                    std::future::pending::<()>().await;
                }
                let (sink, stream) = DownloadStream::channel(sink_capacity)?;
                sink.finish();
                let (parts, ()) = http::Response::new(()).into_parts();
                let report = TransferWatch::finished_with(TransferReport::default());
                Ok(Response::new(parts, request.uri, stream, report))
            })
        }
    }

    #[test]
    fn rejects_unsupported_urls() {
        let client = Client::new();
        for url in ["https://example.com", "/relative", "not a url", "http://"] {
            let err = client.get(url).send().unwrap_err();
            assert!(err.is_builder(), "{url}: {err}");
        }
    }

    #[test]
    fn applies_default_and_user_agent_headers() {
        let engine = Recorded::default();
        let config = ClientConfig::default()
            .with_user_agent("tester/1.0")
            .with_default_header(
                HeaderName::from_static("x-trace"),
                HeaderValue::from_static("on"),
            );
        let client = Client::with_transport(config, engine.clone());

        client
            .put("http://example.test/item")
            .header("x-trace", "override")
            .send()
            .unwrap();

        let seen = engine.seen.lock().unwrap();
        let (method, uri, headers) = &seen[0];
        assert_eq!(*method, Method::PUT);
        assert_eq!(uri.path(), "/item");
        assert_eq!(headers[USER_AGENT], "tester/1.0");
        assert_eq!(headers["x-trace"], "override");
    }

    #[test]
    fn invalid_header_is_reported_on_send() {
        let client = Client::with_transport(ClientConfig::default(), Recorded::default());
        let err = client
            .get("http://example.test/")
            .header("bad header", "x")
            .send()
            .unwrap_err();
        assert!(err.is_builder());
    }

    #[test]
    fn upload_can_only_back_one_request() {
        let client = Client::with_transport(ClientConfig::default(), Recorded::default());
        let upload = client.upload_stream().unwrap();
        let _first = client.post("http://example.test/").stream(&upload);
        let err = client
            .post("http://example.test/")
            .stream(&upload)
            .send()
            .unwrap_err();
        assert_eq!(err, ClientError::Consumed("upload stream"));
    }

    #[test]
    fn timeout_abandons_request_and_aborts_upload() {
        let client = Client::with_transport(ClientConfig::default(), Recorded::default());
        let upload = client.upload_stream().unwrap();
        let err = client
            .post("http://example.test/hang")
            .stream(&upload)
            .timeout(Duration::from_millis(50))
            .send()
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(
            upload.push("late"),
            Err(bodyline_bridge::Error::Aborted(err.to_string()))
        );
    }

    #[test]
    fn cancelled_request_reports_cancelled() {
        let client = Client::with_transport(ClientConfig::default(), Recorded::default());
        let token = CancellationToken::new();
        token.cancel();
        let err = client
            .get("http://example.test/hang")
            .cancel_token(token)
            .send()
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
