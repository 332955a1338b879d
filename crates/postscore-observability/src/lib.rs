use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// A single structured log line's required fields (§4.2): every record is
/// tagged with `runId`, `clientId`, `operation`, regardless of level.
#[derive(Debug, Clone, Serialize)]
pub struct LogContext<'a> {
    pub run_id: &'a str,
    pub client_id: &'a str,
    pub operation: &'a str,
}

impl<'a> LogContext<'a> {
    pub fn new(run_id: &'a str, client_id: &'a str, operation: &'a str) -> Self {
        Self {
            run_id,
            client_id,
            operation,
        }
    }
}

/// Best-effort extraction of `runId`/`clientId` from a value that may be a
/// plain string, an object carrying `.runId`/`.id` or `.clientId`/`.id`, or
/// absent entirely. §4.2: "tolerates missing/object-shaped parameters
/// without crashing" rather than erroring when a caller passes something
/// other than a bare string.
pub fn extract_id(value: Option<&serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Object(map)) => map
            .get("runId")
            .or_else(|| map.get("clientId"))
            .or_else(|| map.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

pub const SYSTEM_CLIENT: &str = "SYSTEM";

/// Emits one structured log line at the requested level, with `run_id`,
/// `client_id`, `operation` as first-class fields (never interpolated into
/// the message) so they stay queryable in the JSON sink.
pub fn log_line(level: Level, ctx: &LogContext<'_>, message: &str) {
    match level {
        Level::ERROR => tracing::error!(
            target: "postscore",
            run_id = ctx.run_id,
            client_id = ctx.client_id,
            operation = ctx.operation,
            "{}",
            message
        ),
        Level::WARN => tracing::warn!(
            target: "postscore",
            run_id = ctx.run_id,
            client_id = ctx.client_id,
            operation = ctx.operation,
            "{}",
            message
        ),
        Level::DEBUG => tracing::debug!(
            target: "postscore",
            run_id = ctx.run_id,
            client_id = ctx.client_id,
            operation = ctx.operation,
            "{}",
            message
        ),
        Level::TRACE => tracing::trace!(
            target: "postscore",
            run_id = ctx.run_id,
            client_id = ctx.client_id,
            operation = ctx.operation,
            "{}",
            message
        ),
        Level::INFO => tracing::info!(
            target: "postscore",
            run_id = ctx.run_id,
            client_id = ctx.client_id,
            operation = ctx.operation,
            "{}",
            message
        ),
    }
}

/// A "summary" line is the fifth level §4.2 calls for, distinct from the
/// four `tracing::Level` variants; emitted at `INFO` with a fixed marker so
/// it is still easy to grep out of the JSON sink.
pub fn log_summary(ctx: &LogContext<'_>, message: &str) {
    tracing::info!(
        target: "postscore",
        run_id = ctx.run_id,
        client_id = ctx.client_id,
        operation = ctx.operation,
        level_kind = "summary",
        "{}",
        message
    );
}

/// Logs an error line and appends the `STACKTRACE:<timestamp>` marker
/// (§4.2, §4.11) when a trace was actually archived, so the marker and the
/// archive row it points at never drift apart. `archived_at` is the
/// microsecond-precision timestamp the Stack Trace Store assigned.
pub fn log_error_with_stacktrace(
    ctx: &LogContext<'_>,
    message: &str,
    archived_at: Option<DateTime<Utc>>,
) {
    match archived_at {
        Some(ts) => {
            let marker = format!("{} STACKTRACE:{}", message, ts.timestamp_micros());
            log_line(Level::ERROR, ctx, &marker);
        }
        None => log_line(Level::ERROR, ctx, message),
    }
}

/// Truncates sampled payload text (post content, raw model responses) to a
/// bounded length for logging, never the full body at info level (§9).
pub fn redact_text(input: &str, max_len: usize) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.chars().count() <= max_len {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(max_len).collect();
    format!(
        "{}… [truncated, full len={} sha256={}]",
        truncated,
        trimmed.len(),
        short_hash(trimmed)
    )
}

pub fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub logs_dir: String,
    pub prefix: String,
    pub retention_days: u64,
    pub initialized_at: DateTime<Utc>,
}

/// Installs the JSON file layer (daily rotation, retention-bounded cleanup)
/// plus a compact console layer, per §10.1.
pub fn init_logging(
    logs_dir: &Path,
    retention_days: u64,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;
    cleanup_old_jsonl(logs_dir, retention_days)?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("postscore")
        .filename_suffix("jsonl")
        .build(logs_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_ansi(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    let info = LoggingInitInfo {
        logs_dir: logs_dir.display().to_string(),
        prefix: "postscore".to_string(),
        retention_days,
        initialized_at: Utc::now(),
    };

    Ok((guard, info))
}

fn cleanup_old_jsonl(logs_dir: &Path, retention_days: u64) -> anyhow::Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    let prefix = "postscore.";

    for entry in fs::read_dir(logs_dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if !name.starts_with(prefix) || !name.ends_with(".jsonl") {
            continue;
        }

        // expected: postscore.YYYY-MM-DD.jsonl
        let date_part = name.trim_start_matches(prefix).trim_end_matches(".jsonl");

        let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };

        let Some(dt) = date.and_hms_opt(0, 0, 0) else {
            continue;
        };

        if DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc) < cutoff {
            let _ = fs::remove_file(path);
        }
    }

    Ok(())
}

pub fn canonical_logs_dir_from_root(root: &Path) -> PathBuf {
    root.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_text_passes_short_strings_through() {
        let raw = "short";
        assert_eq!(redact_text(raw, 500), "short");
    }

    #[test]
    fn redact_text_truncates_long_payloads() {
        let raw = "x".repeat(2000);
        let redacted = redact_text(&raw, 100);
        assert!(redacted.len() < raw.len());
        assert!(redacted.contains("truncated"));
    }

    #[test]
    fn extract_id_reads_run_id_from_object() {
        let value = serde_json::json!({"runId": "260726-120000", "other": 1});
        assert_eq!(
            extract_id(Some(&value)),
            Some("260726-120000".to_string())
        );
    }

    #[test]
    fn extract_id_falls_back_to_plain_id() {
        let value = serde_json::json!({"id": "acme-corp"});
        assert_eq!(extract_id(Some(&value)), Some("acme-corp".to_string()));
    }

    #[test]
    fn extract_id_returns_none_for_missing_value() {
        assert_eq!(extract_id(None), None);
    }

    #[test]
    fn canonical_logs_dir_joins_logs_folder() {
        let root = PathBuf::from("/tmp/postscore");
        let logs = canonical_logs_dir_from_root(&root);
        assert_eq!(logs, PathBuf::from("/tmp/postscore").join("logs"));
    }
}
