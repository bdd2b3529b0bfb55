//! Tracing subscriber setup and per-request trace ids.
//!
//! Every API request runs inside a task-local trace id, taken from the
//! caller's `x-request-id` header or generated. Error bodies and the response
//! header carry it so a failed call can be matched to its log lines.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use thiserror::Error;
use tokio::task_local;
use tracing::Instrument;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::AppConfig;

pub const TRACE_HEADER: &str = "x-request-id";

const MAX_TRACE_ID_LEN: usize = 128;

task_local! {
    static TRACE_ID: String;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install the log bridge: {0}")]
    LogBridge(#[from] log::SetLoggerError),
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
}

/// Installs the global subscriber. `log` records from dependencies are
/// bridged into it.
///
/// `RUST_LOG` overrides `PIPES_LOG_LEVEL`. `PIPES_LOG_FORMAT=pretty` gives
/// human-readable output; anything else gives JSON lines.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|source| {
            TelemetryInitError::Filter {
                filter: config.log_level.clone(),
                source,
            }
        })?,
    };

    LogTracer::init()?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.log_format == "pretty" {
        registry.with(fmt::layer().pretty()).try_init()
    } else {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    };
    if let Err(err) = installed {
        // A subscriber installed by a test harness stays in charge.
        tracing::debug!(error = %err, "global subscriber already set");
    }
    Ok(())
}

/// Trace id of the request being handled, if any.
pub fn current_trace_id() -> Option<String> {
    TRACE_ID.try_with(Clone::clone).ok()
}

fn incoming_trace_id(request: &Request) -> Option<String> {
    request
        .headers()
        .get(TRACE_HEADER)?
        .to_str()
        .ok()
        .filter(|id| !id.is_empty() && id.len() <= MAX_TRACE_ID_LEN)
        .map(str::to_string)
}

/// Scopes the request in its trace id and echoes it in the response.
pub async fn trace_context_middleware(request: Request, next: Next) -> Response {
    let trace_id =
        incoming_trace_id(&request).unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let span = tracing::info_span!("request", trace_id = %trace_id);

    let mut response = TRACE_ID
        .scope(trace_id.clone(), next.run(request).instrument(span))
        .await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trace_id_is_visible_only_inside_the_scope() {
        assert!(current_trace_id().is_none());
        let seen = TRACE_ID
            .scope("abc123".to_string(), async { current_trace_id() })
            .await;
        assert_eq!(seen.as_deref(), Some("abc123"));
    }

    #[test]
    fn oversized_incoming_ids_are_ignored() {
        let request = Request::builder()
            .header(TRACE_HEADER, "x".repeat(MAX_TRACE_ID_LEN + 1))
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(incoming_trace_id(&request).is_none());

        let request = Request::builder()
            .header(TRACE_HEADER, "run-42")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(incoming_trace_id(&request).as_deref(), Some("run-42"));
    }
}
