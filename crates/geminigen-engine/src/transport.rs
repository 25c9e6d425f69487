use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

pub const API_KEY_HEADER: &str = "x-goog-api-key";
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(800);

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// POSTs a JSON body. An `Err` means no HTTP response was obtained.
pub trait Transport: Send + Sync {
    fn post_json(&self, url: &str, api_key: &str, body: &Value, timeout: Duration)
        -> Result<HttpReply>;
}

pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ReqwestTransport {
    fn post_json(
        &self,
        url: &str,
        api_key: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply> {
        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, api_key)
            .timeout(timeout)
            .json(body)
            .send()
            .with_context(|| format!("Gemini request failed ({url})"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .context("Gemini response body read failed")?;
        Ok(HttpReply { status, body })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// 429, 5xx or no response at all.
    Transient,
    Terminal,
}

/// `None` when the outcome is a success.
pub fn classify(outcome: &Result<HttpReply>) -> Option<FailureKind> {
    match outcome {
        Err(_) => Some(FailureKind::Transient),
        Ok(reply) if reply.is_success() => None,
        Ok(reply) if reply.status == 429 || (500..600).contains(&reply.status) => {
            Some(FailureKind::Transient)
        }
        Ok(_) => Some(FailureKind::Terminal),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): linear in the attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

#[derive(Debug)]
pub struct RetryOutcome {
    pub result: Result<HttpReply>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    pub retry: u32,
    pub max_retries: u32,
    pub delay: Duration,
    pub reason: String,
}

/// Sends `body`, retrying transient failures with linear backoff.
///
/// Returns the last outcome once it succeeds, fails terminally, or the retry
/// budget is spent. `on_retry` runs before each backoff sleep.
pub fn send_with_retry(
    transport: &dyn Transport,
    policy: &RetryPolicy,
    url: &str,
    api_key: &str,
    body: &Value,
    timeout: Duration,
    mut on_retry: impl FnMut(&RetryNotice),
) -> RetryOutcome {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let result = transport.post_json(url, api_key, body, timeout);
        if classify(&result) != Some(FailureKind::Transient) {
            return RetryOutcome { result, attempts };
        }

        let retry = attempts;
        if retry > policy.max_retries {
            return RetryOutcome { result, attempts };
        }
        let notice = RetryNotice {
            retry,
            max_retries: policy.max_retries,
            delay: policy.backoff_for(retry),
            reason: failure_reason(&result),
        };
        on_retry(&notice);
        if !notice.delay.is_zero() {
            thread::sleep(notice.delay);
        }
    }
}

/// Body of a successful reply, or an error carrying status and a truncated body.
pub fn reply_body_or_error(reply: HttpReply) -> Result<String> {
    if !reply.is_success() {
        bail!(
            "Gemini request failed ({}): {}",
            reply.status,
            truncate_text(&reply.body, 512)
        );
    }
    Ok(reply.body)
}

fn failure_reason(result: &Result<HttpReply>) -> String {
    match result {
        Ok(reply) => format!("HTTP {}", reply.status),
        Err(err) => error_chain_text(err, 256),
    }
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().map(String::as_str) == Some(trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use serde_json::{json, Value};

    use super::{
        classify, reply_body_or_error, send_with_retry, FailureKind, HttpReply, RetryPolicy,
        Transport,
    };

    /// Replays scripted outcomes and records every call.
    pub(crate) struct ScriptedTransport {
        script: Mutex<Vec<Result<HttpReply>>>,
        pub calls: Mutex<Vec<(String, String, Value)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(mut script: Vec<Result<HttpReply>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
        }
    }

    impl Transport for ScriptedTransport {
        fn post_json(
            &self,
            url: &str,
            api_key: &str,
            body: &Value,
            _timeout: Duration,
        ) -> Result<HttpReply> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((url.to_string(), api_key.to_string(), body.clone()));
            }
            self.script
                .lock()
                .map_err(|_| anyhow!("script lock poisoned"))?
                .pop()
                .unwrap_or_else(|| Err(anyhow!("script exhausted")))
        }
    }

    pub(crate) fn reply(status: u16, body: &str) -> Result<HttpReply> {
        Ok(HttpReply {
            status,
            body: body.to_string(),
        })
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_step: Duration::ZERO,
        }
    }

    fn run(transport: &ScriptedTransport) -> (super::RetryOutcome, Vec<u32>) {
        let mut retries = Vec::new();
        let outcome = send_with_retry(
            transport,
            &no_wait(),
            "http://test/models/m:generateContent",
            "key",
            &json!({}),
            Duration::from_secs(1),
            |notice| retries.push(notice.retry),
        );
        (outcome, retries)
    }

    #[test]
    fn classification_separates_transient_from_terminal() {
        assert_eq!(classify(&reply(200, "{}")), None);
        assert_eq!(classify(&reply(429, "")), Some(FailureKind::Transient));
        assert_eq!(classify(&reply(500, "")), Some(FailureKind::Transient));
        assert_eq!(classify(&reply(503, "")), Some(FailureKind::Transient));
        assert_eq!(classify(&reply(599, "")), Some(FailureKind::Transient));
        assert_eq!(classify(&reply(400, "")), Some(FailureKind::Terminal));
        assert_eq!(classify(&reply(401, "")), Some(FailureKind::Terminal));
        assert_eq!(classify(&reply(600, "")), Some(FailureKind::Terminal));
        assert_eq!(
            classify(&Err(anyhow!("connection reset"))),
            Some(FailureKind::Transient)
        );
    }

    #[test]
    fn success_returns_after_one_attempt() {
        let transport = ScriptedTransport::new(vec![reply(200, "{}")]);
        let (outcome, retries) = run(&transport);
        assert_eq!(outcome.attempts, 1);
        assert!(retries.is_empty());
        assert_eq!(transport.call_count(), 1);
        assert!(outcome.result.is_ok());
    }

    #[test]
    fn terminal_failure_stops_immediately() {
        let transport = ScriptedTransport::new(vec![reply(403, "denied"), reply(200, "{}")]);
        let (outcome, retries) = run(&transport);
        assert_eq!(outcome.attempts, 1);
        assert!(retries.is_empty());
        assert_eq!(outcome.result.ok().map(|r| r.status), Some(403));
    }

    #[test]
    fn transient_failures_retry_at_most_twice() {
        let transport = ScriptedTransport::new(vec![
            reply(503, "busy"),
            Err(anyhow!("timed out")),
            reply(429, "slow down"),
            reply(200, "{}"),
        ]);
        let (outcome, retries) = run(&transport);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(retries, vec![1, 2]);
        assert_eq!(transport.call_count(), 3);
        assert_eq!(outcome.result.ok().map(|r| r.status), Some(429));
    }

    #[test]
    fn recovery_after_a_transient_failure() {
        let transport = ScriptedTransport::new(vec![reply(500, ""), reply(200, "{\"ok\":1}")]);
        let (outcome, retries) = run(&transport);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(retries, vec![1]);
        assert_eq!(
            outcome.result.ok().map(|r| r.body),
            Some("{\"ok\":1}".to_string())
        );
    }

    #[test]
    fn exhausted_transport_errors_surface_the_last_error() {
        let transport = ScriptedTransport::new(vec![
            Err(anyhow!("first")),
            Err(anyhow!("second")),
            Err(anyhow!("third")),
        ]);
        let (outcome, _) = run(&transport);
        assert_eq!(outcome.attempts, 3);
        let message = outcome.result.err().map(|err| err.to_string());
        assert_eq!(message.as_deref(), Some("third"));
    }

    #[test]
    fn zero_retry_policy_makes_a_single_attempt() {
        let transport = ScriptedTransport::new(vec![reply(500, ""), reply(200, "{}")]);
        let policy = RetryPolicy {
            max_retries: 0,
            backoff_step: Duration::ZERO,
        };
        let outcome = send_with_retry(
            &transport,
            &policy,
            "http://test",
            "key",
            &json!({}),
            Duration::from_secs(1),
            |_| {},
        );
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result.ok().map(|r| r.status), Some(500));
    }

    #[test]
    fn backoff_grows_linearly_from_800ms() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(800));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(1600));
    }

    #[test]
    fn non_success_reply_becomes_an_error_with_status() {
        let err = reply_body_or_error(HttpReply {
            status: 400,
            body: "bad request".to_string(),
        })
        .err()
        .map(|err| err.to_string())
        .unwrap_or_default();
        assert_eq!(err, "Gemini request failed (400): bad request");
    }
}
