//! HTTP/1 transport feeding requests to the mock engine.

use crate::core::{Core, CoreError};
use crate::mock::{MockError, MockRequest, MockResponse};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub struct MockServer {
    core: Arc<Core>,
    listener: TcpListener,
    shutdown_rx: broadcast::Receiver<()>,
}

impl MockServer {
    /// Bind to the configured `server.host`/`server.port`.
    pub async fn bind(core: Arc<Core>) -> Result<Self, CoreError> {
        let address = core.server_address();
        let shutdown_rx = core.subscribe_shutdown();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| CoreError::Bind {
                address: address.clone(),
                message: e.to_string(),
            })?;
        info!("Mock server listening on {}", address);
        Ok(Self {
            core,
            listener,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the core is stopped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let core = Arc::clone(&self.core);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let core = Arc::clone(&core);
                                    async move { handle_request(req, core).await }
                                });
                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!("Connection error from {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Mock server shutting down");
                    break;
                }
            }
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    core: Arc<Core>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let request = match into_mock_request(req).await {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return Ok(json_error(StatusCode::BAD_REQUEST, "Invalid request body"));
        }
    };

    match core.mock().handle(request).await {
        Ok(response) => Ok(into_response(response)),
        Err(e @ MockError::RouteNotFound { .. }) => {
            debug!("{}", e);
            Ok(json_error(StatusCode::NOT_FOUND, &e.to_string()))
        }
        Err(e) => Ok(json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())),
    }
}

async fn into_mock_request(req: Request<Incoming>) -> Result<MockRequest, hyper::Error> {
    let (parts, body) = req.into_parts();
    let mut request = MockRequest::new(parts.method.as_str(), parts.uri.path());
    request.query = parts.uri.query().map(str::to_string);
    for (name, value) in &parts.headers {
        request
            .headers
            .insert(name.as_str().to_string(), value.to_str().unwrap_or("").to_string());
    }
    request.body = body.collect().await?.to_bytes();
    Ok(request)
}

fn into_response(response: MockResponse) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Full::new(response.body))
        .unwrap_or_else(|_| json_error(StatusCode::INTERNAL_SERVER_ERROR, "Response build error"))
}

fn json_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_response_keeps_status_and_headers() {
        let response = into_response(MockResponse::text(418, "teapot").with_header("x-a", "1"));
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers()["x-a"], "1");
    }

    #[test]
    fn test_invalid_header_falls_back_to_500() {
        let response = into_response(MockResponse::empty(200).with_header("bad header", "x"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_json_error_body() {
        let response = json_error(StatusCode::NOT_FOUND, "No route found for GET /x");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["content-type"], "application/json");
    }
}
