use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lenshare_api=info,tower_http=warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

pub async fn request_logger(mut request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_string();

    let is_static = path.starts_with("/assets/") || path.ends_with(".js") || path.ends_with(".css");
    let payload = extract_compact_payload(&mut request).await;

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    if !is_static {
        let duration_ms = duration.as_secs_f64() * 1000.0;
        let duration_text = format!("{:05.2}", duration_ms);
        let payload_text = payload.unwrap_or_else(|| "{}".to_string());
        let log_line = format!(
            "{} {} {} {}ms {}",
            method,
            path,
            status.as_u16(),
            duration_text,
            payload_text
        );

        match status.as_u16() {
            200..=299 => info!("{}", log_line),
            400..=499 => warn!("{}", log_line),
            500..=599 => error!("{}", log_line),
            _ => info!("{}", log_line),
        }
    }

    response
}

async fn extract_compact_payload(request: &mut Request<Body>) -> Option<String> {
    if request.method() != axum::http::Method::POST {
        return None;
    }

    // Multipart uploads must keep streaming; never buffer them for a log line.
    let is_multipart = request
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/"))
        .unwrap_or(false);
    if is_multipart {
        return None;
    }

    let body = std::mem::replace(request.body_mut(), Body::empty());
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(_) => return None,
    };

    let body_str = match String::from_utf8(bytes.to_vec()) {
        Ok(s) => s,
        Err(_) => return None,
    };

    let compact = match serde_json::from_str::<serde_json::Value>(&body_str) {
        Ok(value) => redact_credentials(value).to_string(),
        Err(_) => body_str.trim().to_string(),
    };

    let restored = Body::from(bytes);
    *request.body_mut() = restored;

    Some(compact)
}

fn redact_credentials(mut value: serde_json::Value) -> serde_json::Value {
    if let Some(map) = value.as_object_mut() {
        if map.contains_key("password") {
            map.insert("password".to_string(), serde_json::Value::from("***"));
        }
    }
    value
}

pub fn log_error(context: &str, error: &dyn std::error::Error) {
    error!("{}: {}", context, error);
}

pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!("panic at {}: {}", location, payload);
    }));
}
