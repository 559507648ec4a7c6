//! Password gate in front of generation.
//!
//! The password is checked by a remote endpoint. Failed attempts are counted
//! in a small JSON state file; too many failures lock the gate for a while.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use docmerge_shared::{AccessConfig, DocMergeError, Result, config_dir};

const STATE_FILE_NAME: &str = "access.json";
const VALIDATE_TIMEOUT_SECS: u64 = 10;

/// Default location of the gate state file (`~/.docmerge/access.json`).
pub fn state_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(STATE_FILE_NAME))
}

/// Persistent attempt counter and lockout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGate {
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

impl AccessGate {
    /// Read the state file. A missing or unreadable file is a fresh gate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(DocMergeError::io(path, e)),
        };

        match serde_json::from_str(&content) {
            Ok(gate) => Ok(gate),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding corrupt gate state");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DocMergeError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DocMergeError::validation(format!("serialize gate state: {e}")))?;
        std::fs::write(path, json).map_err(|e| DocMergeError::io(path, e))
    }

    /// Fail while a lockout is active; clear an expired one.
    pub fn check(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.locked_until {
            Some(until) if until > now => Err(DocMergeError::LockedOut {
                until: until.to_rfc3339(),
            }),
            Some(_) => {
                debug!("lockout expired");
                self.attempts = 0;
                self.locked_until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Count a failed attempt and return the error to report.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        max_attempts: u32,
        lockout_minutes: i64,
    ) -> DocMergeError {
        self.attempts += 1;
        if self.attempts >= max_attempts {
            let until = match lockout_end(now, lockout_minutes) {
                Ok(until) => until,
                Err(e) => return e,
            };
            self.locked_until = Some(until);
            warn!(attempts = self.attempts, %until, "too many failed attempts, locking");
            return DocMergeError::LockedOut {
                until: until.to_rfc3339(),
            };
        }
        DocMergeError::AccessDenied {
            attempts: self.attempts,
            max_attempts,
        }
    }

    pub fn record_success(&mut self) {
        self.attempts = 0;
        self.locked_until = None;
    }
}

/// When a lockout starting at `now` ends; out-of-range durations are a
/// configuration error.
fn lockout_end(now: DateTime<Utc>, lockout_minutes: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_minutes(lockout_minutes)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| {
            DocMergeError::config(format!(
                "[access].lockout_minutes out of range: {lockout_minutes}"
            ))
        })
}

/// Ask the validation endpoint whether `password` is correct.
///
/// 2xx means accepted, 401/403 rejected; any other status is a network
/// failure and does not count as an attempt.
#[instrument(skip_all, fields(url = %url))]
pub async fn validate_password(url: &Url, password: &str) -> Result<bool> {
    let client = Client::builder()
        .timeout(Duration::from_secs(VALIDATE_TIMEOUT_SECS))
        .build()
        .map_err(|e| DocMergeError::Network(format!("failed to build HTTP client: {e}")))?;

    let response = client
        .post(url.clone())
        .json(&serde_json::json!({ "password": password }))
        .send()
        .await
        .map_err(|e| DocMergeError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if status.is_success() {
        return Ok(true);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Ok(false);
    }
    Err(DocMergeError::Network(format!("{url}: HTTP {status}")))
}

/// Run the full gate: lockout check, remote validation, state update.
pub async fn authorize(
    state_path: &Path,
    config: &AccessConfig,
    password: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(raw) = config.validate_url.as_deref() else {
        return Ok(());
    };
    let url = Url::parse(raw)
        .map_err(|e| DocMergeError::config(format!("invalid [access].validate_url {raw}: {e}")))?;
    lockout_end(now, config.lockout_minutes)?;

    let mut gate = AccessGate::load(state_path)?;
    let before = gate.clone();
    gate.check(now)?;
    if gate != before {
        gate.save(state_path)?;
    }

    if validate_password(&url, password).await? {
        info!("access granted");
        gate.record_success();
        gate.save(state_path)?;
        return Ok(());
    }

    let err = gate.record_failure(now, config.max_attempts, config.lockout_minutes);
    gate.save(state_path)?;
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 8, 0, 0).unwrap()
    }

    fn temp_state(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("docmerge-gate-{tag}-{}", std::process::id()))
            .join(STATE_FILE_NAME)
    }

    #[test]
    fn lockout_after_max_attempts() {
        let mut gate = AccessGate::default();
        assert!(matches!(
            gate.record_failure(now(), 3, 60),
            DocMergeError::AccessDenied { attempts: 1, max_attempts: 3 }
        ));
        gate.record_failure(now(), 3, 60);
        assert!(matches!(
            gate.record_failure(now(), 3, 60),
            DocMergeError::LockedOut { .. }
        ));

        assert!(gate.check(now() + chrono::Duration::minutes(59)).is_err());
        gate.check(now() + chrono::Duration::minutes(61)).unwrap();
        assert_eq!(gate, AccessGate::default());
    }

    #[test]
    fn extreme_lockout_is_a_config_error() {
        let mut gate = AccessGate::default();
        assert!(matches!(
            gate.record_failure(now(), 1, i64::MAX),
            DocMergeError::Config { .. }
        ));
        assert_eq!(gate.locked_until, None);
        assert!(lockout_end(now(), i64::MAX / 60_000).is_err());
        assert_eq!(
            lockout_end(now(), 60).unwrap(),
            now() + TimeDelta::try_minutes(60).unwrap()
        );
    }

    #[tokio::test]
    async fn authorize_rejects_extreme_lockout_before_asking() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let config = AccessConfig {
            validate_url: Some(format!("{}/validate", server.uri())),
            lockout_minutes: i64::MAX,
            ..AccessConfig::default()
        };
        let state = temp_state("extreme");

        let err = authorize(&state, &config, "secret", now()).await.unwrap_err();
        assert!(matches!(err, DocMergeError::Config { .. }));
    }

    #[test]
    fn success_resets() {
        let mut gate = AccessGate {
            attempts: 2,
            locked_until: None,
        };
        gate.record_success();
        assert_eq!(gate.attempts, 0);
    }

    #[test]
    fn state_round_trips_through_file() {
        let path = temp_state("file");
        let gate = AccessGate {
            attempts: 1,
            locked_until: Some(now()),
        };
        gate.save(&path).unwrap();
        assert_eq!(AccessGate::load(&path).unwrap(), gate);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();

        assert_eq!(AccessGate::load(&path).unwrap(), AccessGate::default());
    }

    #[tokio::test]
    async fn validate_password_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/validate"))
            .and(body_json(serde_json::json!({ "password": "right" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/validate"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/api/validate", server.uri())).unwrap();
        assert!(validate_password(&url, "right").await.unwrap());
        assert!(!validate_password(&url, "wrong").await.unwrap());

        let broken = Url::parse(&format!("{}/broken", server.uri())).unwrap();
        assert!(matches!(
            validate_password(&broken, "x").await.unwrap_err(),
            DocMergeError::Network(_)
        ));
    }

    #[tokio::test]
    async fn authorize_counts_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let path = temp_state("authorize");
        let config = AccessConfig {
            validate_url: Some(format!("{}/api/validate", server.uri())),
            max_attempts: 2,
            ..AccessConfig::default()
        };

        let err = authorize(&path, &config, "nope", now()).await.unwrap_err();
        assert!(matches!(err, DocMergeError::AccessDenied { attempts: 1, .. }));
        let err = authorize(&path, &config, "nope", now()).await.unwrap_err();
        assert!(matches!(err, DocMergeError::LockedOut { .. }));
        // Locked: rejected before the endpoint is asked.
        let err = authorize(&path, &config, "nope", now()).await.unwrap_err();
        assert!(matches!(err, DocMergeError::LockedOut { .. }));

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn authorize_without_url_is_open() {
        let path = temp_state("open");
        authorize(&path, &AccessConfig::default(), "", now())
            .await
            .unwrap();
        assert!(!path.exists());
    }
}
