//! Request routing and handlers

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use tracing::{debug, error, warn};

use super::{AppState, SEND_PATH, WRITE_PATH};
use crate::bridge::{reply_headers, BridgeError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = respond(status, Bytes::from_static(body.as_bytes()));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn method_not_allowed(allow: &'static str) -> Response<Full<Bytes>> {
    let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(allow));
    response
}

/// Route one request
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, SEND_PATH) => send(req, &state).await,
        (&Method::POST, WRITE_PATH) => write(req, &state).await,
        (_, SEND_PATH) | (_, WRITE_PATH) => method_not_allowed("POST"),
        (&Method::GET, "/health" | "/healthz" | "/ready" | "/readyz") => {
            text(StatusCode::OK, "OK")
        }
        (&Method::GET, "/metrics") => metrics(&state),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

/// Query parameters; the first occurrence of a name wins
fn query_params(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = query {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(name.into_owned())
                .or_insert_with(|| value.into_owned());
        }
    }
    params
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let collected = if limit == 0 {
        body.collect().await.map_err(Into::into)
    } else {
        Limited::new(body, limit).collect().await
    };

    match collected {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(text(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Payload Too Large",
        )),
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            Err(text(StatusCode::BAD_REQUEST, "Bad Request"))
        }
    }
}

async fn send<B>(req: Request<B>, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let params = query_params(req.uri().query());
    let (write_topic, read_topic) = match (
        required(&params, "writeQueueName"),
        required(&params, "readQueueName"),
    ) {
        (Some(write), Some(read)) => (write.to_string(), read.to_string()),
        _ => {
            state.record("send", "bad_request");
            return text(
                StatusCode::BAD_REQUEST,
                "writeQueueName and readQueueName are required",
            );
        }
    };

    let (parts, body) = req.into_parts();
    let body = match read_body(body, state.max_body_size).await {
        Ok(body) => body,
        Err(response) => {
            state.record("send", "bad_request");
            return response;
        }
    };
    debug!(%write_topic, %read_topic, bytes = body.len(), "POST {}", SEND_PATH);

    // Run on its own task so a disconnecting client cannot cut teardown short
    let bridge = state.bridge.clone();
    let headers = parts.headers;
    let task = tokio::spawn(async move {
        bridge
            .send_and_wait(&write_topic, &read_topic, body, &headers)
            .await
    });

    match task.await {
        Ok(Ok(reply)) => {
            state.record("send", "ok");
            let mut response = respond(StatusCode::OK, reply.body);
            *response.headers_mut() = reply_headers(&reply.properties);
            response
        }
        Ok(Err(BridgeError::ReplyTimeout { .. })) => {
            state.record("send", "timeout");
            respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
        }
        Ok(Err(_)) => {
            state.record("send", "error");
            respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
        }
        Err(e) => {
            error!("Bridge task failed: {}", e);
            state.record("send", "error");
            respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
        }
    }
}

async fn write<B>(req: Request<B>, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let params = query_params(req.uri().query());
    let Some(topic) = required(&params, "queueName").map(str::to_string) else {
        state.record("write", "bad_request");
        return text(StatusCode::BAD_REQUEST, "queueName is required");
    };

    let (parts, body) = req.into_parts();
    let body = match read_body(body, state.max_body_size).await {
        Ok(body) => body,
        Err(response) => {
            state.record("write", "bad_request");
            return response;
        }
    };
    debug!(%topic, bytes = body.len(), "POST {}", WRITE_PATH);

    let bridge = state.bridge.clone();
    let headers = parts.headers;
    let task = tokio::spawn(async move { bridge.send_only(&topic, body, &headers).await });

    match task.await {
        Ok(Ok(())) => {
            state.record("write", "ok");
            respond(StatusCode::OK, Bytes::new())
        }
        Ok(Err(_)) => {
            state.record("write", "error");
            respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
        }
        Err(e) => {
            error!("Bridge task failed: {}", e);
            state.record("write", "error");
            respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
        }
    }
}

fn metrics(state: &AppState) -> Response<Full<Bytes>> {
    let Some(metrics) = &state.metrics else {
        return text(StatusCode::NOT_FOUND, "Not Found");
    };

    match metrics.render() {
        Ok((buffer, content_type)) => {
            let mut response = respond(StatusCode::OK, buffer);
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            )
        }
    }
}
