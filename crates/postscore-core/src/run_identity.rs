use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use postscore_types::{ClientId, ClientRunId, RunId};

/// The run identity service never fails on non-canonical format; it only
/// fails when an input cannot be coerced to a non-empty string at all
/// (§4.1, §9 "Run-identifier object confusion").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedIdentifier(pub String);

impl fmt::Display for MalformedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed identifier: {}", self.0)
    }
}

impl std::error::Error for MalformedIdentifier {}

/// Rejects the inputs the design notes call out explicitly: empty strings
/// and the literal stringified-object sentinel a caller passing a bare
/// object through `format!("{:?}")` or similar would produce.
fn validate_identifier_part(raw: &str, what: &str) -> Result<(), MalformedIdentifier> {
    if raw.trim().is_empty() {
        return Err(MalformedIdentifier(format!("{what} is empty")));
    }
    if raw == "[object Object]" {
        return Err(MalformedIdentifier(format!(
            "{what} looks like a stringified object: `{raw}`"
        )));
    }
    Ok(())
}

/// Mints and memoises run identifiers (§4.1). Memoisation is per-client: a
/// base run may compose several `ClientRunId`s but each client gets exactly
/// one unless `forceNew` is requested.
#[derive(Clone, Default)]
pub struct RunIdentityService {
    memo: Arc<RwLock<HashMap<String, ClientRunId>>>,
}

impl RunIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current UTC instant as `YYMMDD-HHMMSS`.
    pub fn generate(&self) -> RunId {
        RunId(Utc::now().format("%y%m%d-%H%M%S").to_string())
    }

    pub fn compose(&self, base: &RunId, client_id: &ClientId) -> Result<ClientRunId, MalformedIdentifier> {
        validate_identifier_part(base.as_ref(), "base run id")?;
        validate_identifier_part(client_id.as_ref(), "client id")?;
        Ok(ClientRunId(format!("{}-{}", base.0, client_id.0)))
    }

    /// First two hyphen-separated segments if both match `^\d{6}$`; else
    /// the whole input is returned unchanged and a warning is logged
    /// (§4.1 `baseOf`). Never fails on non-canonical format.
    pub fn base_of(&self, id: &str) -> RunId {
        let segments: Vec<&str> = id.splitn(3, '-').collect();
        if segments.len() >= 2 && is_six_digits(segments[0]) && is_six_digits(segments[1]) {
            return RunId(format!("{}-{}", segments[0], segments[1]));
        }
        tracing::warn!(target: "postscore", id, "run id does not match canonical YYMMDD-HHMMSS form");
        RunId(id.to_string())
    }

    /// Everything after the second hyphen-separated segment, joined back
    /// with `-`. `None` if the id has fewer than three segments.
    pub fn client_id_of(&self, id: &str) -> Option<ClientId> {
        let mut parts = id.splitn(3, '-');
        let _first = parts.next()?;
        let _second = parts.next()?;
        let rest = parts.next()?;
        if rest.is_empty() {
            None
        } else {
            Some(ClientId(rest.to_string()))
        }
    }

    /// Returns the memoised `ClientRunId` for `client_id`, minting one
    /// against `base` when absent or when `force_new` is set.
    pub async fn get_or_create_for(
        &self,
        base: &RunId,
        client_id: &ClientId,
        force_new: bool,
    ) -> Result<ClientRunId, MalformedIdentifier> {
        if !force_new {
            if let Some(existing) = self.memo.read().await.get(client_id.as_ref()) {
                return Ok(existing.clone());
            }
        }
        let composed = self.compose(base, client_id)?;
        self.memo
            .write()
            .await
            .insert(client_id.0.clone(), composed.clone());
        Ok(composed)
    }
}

fn is_six_digits(segment: &str) -> bool {
    segment.len() == 6 && segment.bytes().all(|b| b.is_ascii_digit())
}
