//! Session reconciliation and lifecycle.
//!
//! [`SessionManager`] produces the single authoritative answer to "who is
//! signed in, and with what credential" by reconciling the persisted
//! credential, the backend's profile endpoint, and locally persisted
//! fallback records. The backend wins whenever it is reachable and accepts
//! the credential; local records substitute only when it is silent or
//! explicitly rejects; a credential with no recoverable identity is purged.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use chatdoc_client::ApiClient;
use chatdoc_shared::{
    ChatDocError, FallbackSessionRecord, Result, Session, SessionProvenance, UserIdentity,
};
use chatdoc_store::Store;

/// Store key holding the bearer credential.
pub const KEY_TOKEN: &str = "auth.token";
/// Store key holding the denormalized fallback session record (JSON).
pub const KEY_FALLBACK_SESSION: &str = "auth.session";
/// Store key holding the raw identity record (JSON).
pub const KEY_USER: &str = "auth.user";
/// Store key for the account directory cache some client surfaces maintain.
/// Never written here, but purged on sign-out with the rest.
pub const KEY_ACCOUNT_CACHE: &str = "auth.accounts";

/// Owns authentication identity and its reconciliation.
pub struct SessionManager<'a> {
    store: &'a Store,
    client: &'a ApiClient,
}

impl<'a> SessionManager<'a> {
    pub fn new(store: &'a Store, client: &'a ApiClient) -> Self {
        Self { store, client }
    }

    // -----------------------------------------------------------------------
    // Startup reconciliation
    // -----------------------------------------------------------------------

    /// Reconcile the persisted state into a session, or none.
    ///
    /// Always terminates with a well-formed session or an absent one. A
    /// credential rejection from the backend is the expected consequence of
    /// expiry and is recovered locally, never surfaced as an error.
    #[instrument(skip_all)]
    pub async fn reconcile(&self) -> Result<Option<Session>> {
        let Some(token) = self.store.get(KEY_TOKEN).await? else {
            // No credential. A fallback record may still carry a session
            // from an earlier sign-in whose token write was lost.
            if let Some(record) = self.fallback_record().await? {
                debug!(user = %record.user.email, "adopting fallback session without credential");
                return Ok(Some(Session {
                    user: record.user,
                    token: record.token,
                    provenance: SessionProvenance::LocalFallback,
                }));
            }
            return Ok(None);
        };

        match self.client.fetch_profile(&token).await {
            Ok(user) => {
                debug!(user = %user.email, "session confirmed by backend");
                return Ok(Some(Session {
                    user,
                    token,
                    provenance: SessionProvenance::Remote,
                }));
            }
            Err(e) if e.is_auth_rejection() => {
                // Expected: the credential expired since the last visit.
                debug!("stored credential rejected, checking local records");
            }
            Err(e) => {
                // Degraded: the backend should have answered but did not.
                warn!(error = %e, "profile fetch failed, checking local records");
            }
        }

        // Fallback chain: the denormalized session record first, then the
        // raw identity record.
        if let Some(record) = self.fallback_record().await? {
            return Ok(Some(Session {
                user: record.user,
                token,
                provenance: SessionProvenance::LocalFallback,
            }));
        }
        if let Some(user) = self.raw_identity().await? {
            return Ok(Some(Session {
                user,
                token,
                provenance: SessionProvenance::LocalFallback,
            }));
        }

        // A credential with no recoverable identity must not be left
        // dangling.
        info!("purging credential with no recoverable identity");
        self.store.remove(KEY_TOKEN).await?;
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Adopt an identity and credential produced by an authentication
    /// exchange, persisting all session records in one transaction.
    #[instrument(skip_all, fields(user = %user.email))]
    pub async fn sign_in(&self, user: UserIdentity, token: String) -> Result<Session> {
        let record = FallbackSessionRecord {
            user: user.clone(),
            token: token.clone(),
            signed_in_at: Utc::now(),
        };
        let user_json = to_json(&user)?;
        let record_json = to_json(&record)?;

        self.store
            .put_many(&[
                (KEY_TOKEN, token.as_str()),
                (KEY_USER, user_json.as_str()),
                (KEY_FALLBACK_SESSION, record_json.as_str()),
            ])
            .await?;

        Ok(Session {
            user,
            token,
            provenance: SessionProvenance::Remote,
        })
    }

    /// End the session: best-effort backend notification, then an
    /// unconditional purge of every persisted session record.
    #[instrument(skip_all)]
    pub async fn sign_out(&self) -> Result<()> {
        if let Some(token) = self.store.get(KEY_TOKEN).await? {
            if let Err(e) = self.client.sign_out(&token).await {
                warn!(error = %e, "backend sign-out failed, clearing local state anyway");
            }
        }

        self.store
            .remove_many(&[KEY_TOKEN, KEY_FALLBACK_SESSION, KEY_USER, KEY_ACCOUNT_CACHE])
            .await
    }

    /// Replace the session's identity after a profile update, keeping the
    /// raw identity record and any fallback record consistent.
    #[instrument(skip_all, fields(user = %user.email))]
    pub async fn update_identity(&self, session: &mut Session, user: UserIdentity) -> Result<()> {
        let user_json = to_json(&user)?;
        let mut writes: Vec<(&str, String)> = vec![(KEY_USER, user_json)];

        if let Some(mut record) = self.fallback_record().await? {
            record.user = user.clone();
            writes.push((KEY_FALLBACK_SESSION, to_json(&record)?));
        }

        let entries: Vec<(&str, &str)> = writes.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.store.put_many(&entries).await?;

        session.user = user;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Persisted records
    // -----------------------------------------------------------------------

    async fn fallback_record(&self) -> Result<Option<FallbackSessionRecord>> {
        Ok(self
            .store
            .get(KEY_FALLBACK_SESSION)
            .await?
            .and_then(|json| parse_or_discard(&json, KEY_FALLBACK_SESSION)))
    }

    async fn raw_identity(&self) -> Result<Option<UserIdentity>> {
        Ok(self
            .store
            .get(KEY_USER)
            .await?
            .and_then(|json| parse_or_discard(&json, KEY_USER)))
    }
}

/// Parse a persisted JSON record, treating a corrupt one as absent so
/// reconciliation still terminates.
fn parse_or_discard<T: serde::de::DeserializeOwned>(json: &str, key: &str) -> Option<T> {
    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "discarding unparseable record");
            None
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ChatDocError::Storage(e.to_string()))
}
