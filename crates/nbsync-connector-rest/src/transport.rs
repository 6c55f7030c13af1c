//! Shared HTTP transport
//!
//! Authentication, retry with backoff and status-to-error mapping used by
//! both clients.

use chrono::{DateTime, Utc};
use reqwest::{header, Client, Method, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace, warn};

use nbsync_connector::error::{ConnectorError, ConnectorResult};
use nbsync_connector::types::ObjectKind;

use crate::config::RetryConfig;

/// Record a request is about, for 404/409 mapping.
pub(crate) type Target<'a> = Option<(ObjectKind, &'a str)>;

pub(crate) struct Transport {
    client: Client,
    authorization: String,
    retry: RetryConfig,
    timeout_secs: u64,
}

impl Transport {
    pub(crate) fn new(
        authorization: String,
        timeout_secs: u64,
        retry: RetryConfig,
    ) -> ConnectorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ConnectorError::InvalidConfiguration {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            authorization,
            retry,
            timeout_secs,
        })
    }

    /// Send a request, retrying transient failures with backoff.
    ///
    /// Retries network errors and the configured status codes; a 429 waits
    /// for `Retry-After` when the server sends one.
    pub(crate) async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> ConnectorResult<Response> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut request = self
                .client
                .request(method.clone(), url)
                .header(header::AUTHORIZATION, &self.authorization)
                .header(header::ACCEPT, "application/json");
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(json_body) = body {
                trace!(body = %json_body, "Request body");
                request = request.json(json_body);
            }

            debug!(url = %url, method = %method, attempt = attempt, "Sending request");

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    debug!(url = %url, status = %status, attempt = attempt, "Received response");

                    if self.retry.should_retry(status.as_u16()) && attempt <= self.retry.max_retries
                    {
                        let wait = if status == StatusCode::TOO_MANY_REQUESTS {
                            resp.headers()
                                .get(header::RETRY_AFTER)
                                .and_then(|v| v.to_str().ok())
                                .and_then(parse_retry_after)
                                .unwrap_or_else(|| self.retry.calculate_backoff(attempt))
                        } else {
                            self.retry.calculate_backoff(attempt)
                        };

                        warn!(
                            url = %url,
                            status = %status,
                            attempt = attempt,
                            wait_ms = wait.as_millis(),
                            "Transient error, retrying with backoff"
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    if attempt <= self.retry.max_retries {
                        let backoff = self.retry.calculate_backoff(attempt);
                        warn!(
                            url = %url,
                            error = %e,
                            attempt = attempt,
                            wait_ms = backoff.as_millis(),
                            "Request failed, retrying with backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if e.is_timeout() {
                        return Err(ConnectorError::ConnectionTimeout {
                            timeout_secs: self.timeout_secs,
                        });
                    }
                    return Err(ConnectorError::connection_failed_with_source(
                        format!("Request failed after {attempt} attempts: {url}"),
                        e,
                    ));
                }
            }
        }
    }

    /// Send a request and decode a successful JSON response body.
    ///
    /// Returns `Value::Null` for empty bodies (e.g. `204 No Content`).
    pub(crate) async fn json(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        target: Target<'_>,
    ) -> ConnectorResult<Value> {
        let response = self.send(method, url, query, body).await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(handle_response_error(status, &text, target));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ConnectorError::Serialization {
            message: format!("Failed to parse response from {url}: {e}"),
        })
    }

    /// GET a JSON document.
    pub(crate) async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        target: Target<'_>,
    ) -> ConnectorResult<Value> {
        self.json(Method::GET, url, query, None, target).await
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            ["detail", "message", "error"]
                .iter()
                .find_map(|key| json.get(key).and_then(Value::as_str).map(str::to_string))
                .or_else(|| json.is_object().then(|| json.to_string()))
        })
        .unwrap_or_else(|| body.to_string())
}

/// Map an unsuccessful HTTP status to a connector error.
pub(crate) fn handle_response_error(
    status: StatusCode,
    body: &str,
    target: Target<'_>,
) -> ConnectorError {
    let message = error_message(body);

    match status {
        StatusCode::UNAUTHORIZED => ConnectorError::AuthenticationFailed,
        StatusCode::FORBIDDEN => ConnectorError::AuthorizationFailed {
            operation: target.map_or_else(
                || "API call".to_string(),
                |(kind, _)| format!("{kind} access"),
            ),
        },
        StatusCode::NOT_FOUND => match target {
            Some((kind, identifier)) => ConnectorError::not_found(kind, identifier),
            None => ConnectorError::operation_failed(format!("HTTP {status}: {message}")),
        },
        StatusCode::CONFLICT => match target {
            Some((kind, identifier)) => ConnectorError::ObjectAlreadyExists {
                kind,
                identifier: identifier.to_string(),
            },
            None => ConnectorError::operation_failed(format!("HTTP {status}: {message}")),
        },
        StatusCode::BAD_REQUEST => ConnectorError::InvalidData { message },
        StatusCode::TOO_MANY_REQUESTS => ConnectorError::RateLimited { message },
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            ConnectorError::TargetUnavailable { message }
        }
        _ => ConnectorError::operation_failed(format!("HTTP {status}: {message}")),
    }
}

/// Parse a `Retry-After` header value, either delay seconds or an HTTP-date.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    parse_retry_after_at(value, Utc::now())
}

/// Parse a `Retry-After` value relative to `now`. A date in the past means
/// no wait.
fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap();

        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after_at("21/10/2015", now), None);
    }

    #[test]
    fn test_status_mapping() {
        let target = Some((ObjectKind::Cluster, "7"));

        assert!(matches!(
            handle_response_error(StatusCode::UNAUTHORIZED, "", target),
            ConnectorError::AuthenticationFailed
        ));
        assert!(matches!(
            handle_response_error(StatusCode::FORBIDDEN, "", target),
            ConnectorError::AuthorizationFailed { .. }
        ));
        assert!(matches!(
            handle_response_error(StatusCode::NOT_FOUND, "", target),
            ConnectorError::ObjectNotFound { kind: ObjectKind::Cluster, .. }
        ));
        assert!(matches!(
            handle_response_error(StatusCode::CONFLICT, "", target),
            ConnectorError::ObjectAlreadyExists { .. }
        ));
        assert!(matches!(
            handle_response_error(StatusCode::TOO_MANY_REQUESTS, "", None),
            ConnectorError::RateLimited { .. }
        ));
        assert!(matches!(
            handle_response_error(StatusCode::BAD_GATEWAY, "", None),
            ConnectorError::TargetUnavailable { .. }
        ));
        assert!(matches!(
            handle_response_error(StatusCode::NOT_FOUND, "", None),
            ConnectorError::OperationFailed { .. }
        ));
    }

    #[test]
    fn test_error_message_extraction() {
        let err = handle_response_error(
            StatusCode::BAD_REQUEST,
            r#"{"detail": "Invalid token header"}"#,
            None,
        );
        assert_eq!(err.to_string(), "invalid data: Invalid token header");

        let err = handle_response_error(
            StatusCode::BAD_REQUEST,
            r#"{"slug": ["site with this slug already exists."]}"#,
            None,
        );
        assert!(err.to_string().contains("site with this slug already exists."));

        let err = handle_response_error(StatusCode::INTERNAL_SERVER_ERROR, "boom", None);
        assert_eq!(
            err.to_string(),
            "operation failed: HTTP 500 Internal Server Error: boom"
        );
    }
}
