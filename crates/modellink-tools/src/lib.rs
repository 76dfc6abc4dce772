use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use modellink_contracts::{Headers, HttpMethod, InvocationRequest, RequestBody};
use modellink_core::{CoreError, HttpResponse, HttpTransport};
use reqwest::Client;
use reqwest::multipart::Form;
use tracing::debug;

pub mod tools;

pub use tools::ToolRegistry;

/// Production upstream host.
pub const DEFAULT_BASE_URL: &str = "https://api.modellink.online";

/// reqwest-backed transport. Per-request timeouts come from the request
/// itself; the client only carries the connect timeout.
#[derive(Debug, Clone)]
pub struct HttpRuntime {
    client: Client,
}

impl HttpRuntime {
    pub fn build_http_client(connect_timeout: Duration) -> Result<Client, CoreError> {
        Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| CoreError::Network(format!("http client init failed: {err}")))
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, CoreError> {
        Self::build_http_client(connect_timeout).map(Self::new)
    }
}

#[async_trait]
impl HttpTransport for HttpRuntime {
    async fn send(&self, request: InvocationRequest) -> Result<HttpResponse, CoreError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, &request.url).timeout(request.timeout);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(payload) => builder.json(&payload),
            RequestBody::Multipart(fields) => {
                let form =
                    fields.into_iter().fold(Form::new(), |form, (name, value)| form.text(name, value));
                builder.multipart(form)
            }
        };

        debug!(
            event = "upstream.request",
            method = request.method.as_str(),
            url = %request.url,
            streaming = request.streaming,
            timeout_ms = request.timeout.as_millis() as u64
        );
        let response = builder.send().await.map_err(network_error)?;

        let status = response.status();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes_stream().map(|chunk| chunk.map_err(network_error));

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: Box::pin(body),
        })
    }
}

fn network_error(err: reqwest::Error) -> CoreError {
    if err.is_timeout() {
        CoreError::Network(format!("request timed out: {err}"))
    } else {
        CoreError::Network(format!("request failed: {err}"))
    }
}
