use crate::AppState;
use crate::MAX_REQUEST_BODY;
use crate::fetcher::{FetchError, FetchRequest};
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use strapre_proto::StoredResponse;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};
use url::Url;

/// Headers that describe a single hop and are never forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/_sw/status", get(handle_status))
        .fallback(handle_intercept)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registration.status().await)
}

/// Turn every other request into a fetch event for the registration
async fn handle_intercept(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let url = target_url(&state.origin, &uri);

    let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            warn!("Rejecting request body for {}: {}", url, e);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let mut request = FetchRequest::new(method.as_str(), url);
    request.headers = forwardable(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
    );
    request.body = body;

    match state.registration.handle_fetch(&request).await {
        Ok(response) => into_http_response(response),
        Err(e) => {
            error!("Fetch of {} {} failed: {}", request.method, request.url, e);
            let status = match e {
                FetchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                FetchError::Network(_) | FetchError::InvalidRequest(_) => StatusCode::BAD_GATEWAY,
            };
            (status, format!("Fetch failed: {}", e)).into_response()
        }
    }
}

/// Resolve the incoming path and query against the origin without letting
/// a `//host` path escape it
fn target_url(origin: &Url, uri: &Uri) -> Url {
    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url
}

fn forwardable<'a>(headers: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<(String, String)> {
    headers
        .filter(|(name, _)| !HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

fn into_http_response(response: StoredResponse) -> Response {
    let Ok(status) = StatusCode::from_u16(response.status) else {
        warn!("Upstream returned unrepresentable status {}", response.status);
        return (StatusCode::BAD_GATEWAY, "Invalid upstream status").into_response();
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in forwardable(response.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))) {
        builder = builder.header(name, value);
    }

    match builder.body(Body::from(response.body)) {
        Ok(response) => response,
        Err(e) => {
            debug!("Failed to rebuild response: {}", e);
            (StatusCode::BAD_GATEWAY, "Invalid upstream headers").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url_stays_on_origin() {
        let origin = Url::parse("https://strapre.example").unwrap();
        let uri: Uri = "//evil.example/steal?x=1".parse().unwrap();
        let url = target_url(&origin, &uri);
        assert_eq!(url.host_str(), Some("strapre.example"));
        assert_eq!(url.query(), Some("x=1"));
    }

    #[test]
    fn test_hop_by_hop_headers_dropped() {
        let headers = forwardable(
            [("Connection", "close"), ("Accept", "text/html"), ("Host", "x")].into_iter(),
        );
        assert_eq!(headers, vec![("Accept".to_string(), "text/html".to_string())]);
    }

    #[test]
    fn test_response_keeps_status_and_headers() {
        let response = into_http_response(StoredResponse::new(
            404,
            vec![
                ("content-type".to_string(), "text/plain".to_string()),
                ("transfer-encoding".to_string(), "chunked".to_string()),
            ],
            b"missing".to_vec(),
        ));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
        assert!(response.headers().get("transfer-encoding").is_none());
    }
}
