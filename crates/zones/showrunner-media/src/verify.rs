//! Polling verification verbs. Both poll the cached state snapshot, issue
//! corrective commands on mismatch, and report a structured result rather
//! than raising; the caller decides whether a timeout aborts anything.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;

use showrunner_core::adapter::{AdapterContext, AdapterError, JsonMap, ZoneAdapter};
use showrunner_core::events::Warning;
use showrunner_core::verb::Verb;

use crate::MediaAdapter;

const BROWSER_TIMEOUT_MS: u64 = 20_000;
const BROWSER_POLL_MS: u64 = 2_000;
const IMAGE_TIMEOUT_MS: u64 = 10_000;
const IMAGE_POLL_MS: u64 = 1_000;

fn ms_option(options: &JsonMap, key: &str, default: u64) -> u64 {
    options.get(key).and_then(Value::as_u64).unwrap_or(default)
}

/// Drive the zone's browser to `{url, visible}`, correcting whatever differs
/// on each poll.
pub(crate) async fn verify_browser(
    adapter: &MediaAdapter,
    ctx: &AdapterContext,
    options: &JsonMap,
) -> Result<Value, AdapterError> {
    let url = options
        .get("url")
        .and_then(Value::as_str)
        .ok_or(AdapterError::InvalidOptions {
            verb: Verb::VerifyBrowser,
            reason: "missing url".to_string(),
        })?
        .to_string();
    let want_visible = options
        .get("visible")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let timeout = Duration::from_millis(ms_option(options, "timeout", BROWSER_TIMEOUT_MS));
    let poll = Duration::from_millis(ms_option(options, "poll", BROWSER_POLL_MS));

    let started = Instant::now();
    let mut restarted = false;
    let mut url_changed = false;
    let mut visibility_changed = false;

    loop {
        let browser = adapter
            .snapshot()
            .and_then(|state| state.get("browser").cloned())
            .unwrap_or(Value::Null);
        let enabled = browser
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let current_url = browser
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let visible = browser
            .get("visible")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if !enabled {
            restarted = true;
            let mut opts = JsonMap::new();
            opts.insert("url".to_string(), json!(url));
            adapter.send(ctx, Verb::EnableBrowser, opts).await?;
        } else if current_url != url {
            url_changed = true;
            let mut opts = JsonMap::new();
            opts.insert("url".to_string(), json!(url));
            adapter.send(ctx, Verb::SetBrowserUrl, opts).await?;
        } else if visible != want_visible {
            visibility_changed = true;
            let verb = if want_visible {
                Verb::ShowBrowser
            } else {
                Verb::HideBrowser
            };
            adapter.send(ctx, verb, JsonMap::new()).await?;
        } else {
            return Ok(json!({
                "success": true,
                "timeElapsed": started.elapsed().as_millis() as u64,
                "restarted": restarted,
                "urlChanged": url_changed,
                "visibilityChanged": visibility_changed,
                "timedOut": false,
            }));
        }

        if started.elapsed() >= timeout {
            tracing::warn!(%url, "browser verification timed out");
            return Ok(json!({
                "success": false,
                "timeElapsed": started.elapsed().as_millis() as u64,
                "restarted": restarted,
                "urlChanged": url_changed,
                "visibilityChanged": visibility_changed,
                "timedOut": true,
            }));
        }
        tokio::time::sleep(poll).await;
    }
}

/// Ensure the zone is showing `file`, re-issuing `setImage` on mismatch. On
/// timeout a structured warning lands on the zone's warnings topic.
pub(crate) async fn verify_image(
    adapter: &MediaAdapter,
    ctx: &AdapterContext,
    options: &JsonMap,
) -> Result<Value, AdapterError> {
    let file = options
        .get("file")
        .and_then(Value::as_str)
        .ok_or(AdapterError::InvalidOptions {
            verb: Verb::VerifyImage,
            reason: "missing file".to_string(),
        })?
        .to_string();
    let timeout = Duration::from_millis(ms_option(options, "timeout", IMAGE_TIMEOUT_MS));
    let poll = Duration::from_millis(ms_option(options, "poll", IMAGE_POLL_MS));

    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        let current = adapter
            .snapshot()
            .and_then(|state| {
                state
                    .get("file")
                    .or_else(|| state.get("image"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        if current == file {
            return Ok(json!({
                "success": true,
                "attempts": attempts,
                "timeElapsed": started.elapsed().as_millis() as u64,
                "timedOut": false,
            }));
        }

        attempts += 1;
        let mut opts = JsonMap::new();
        opts.insert("file".to_string(), json!(file));
        adapter.send(ctx, Verb::SetImage, opts).await?;

        if started.elapsed() >= timeout {
            let warning = Warning::new(
                "media_verification_error",
                format!("image {file} not confirmed after {attempts} attempts"),
            )
            .with("file", json!(file))
            .with("attempts", json!(attempts));
            if let Err(e) = ctx
                .bus
                .publish(&adapter.topics().warnings(), warning.payload())
                .await
            {
                tracing::warn!(error = %e, "failed to publish verification warning");
            }
            return Ok(json!({
                "success": false,
                "attempts": attempts,
                "timedOut": true,
            }));
        }
        tokio::time::sleep(poll).await;
    }
}
