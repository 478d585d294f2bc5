//! Session persistence and the authentication context.
//!
//! The session lives in a durable key-value store under two fixed keys,
//! [`TOKEN_KEY`] and [`USER_KEY`]. [`SessionContext`] reads the store once at
//! start-up and is then passed explicitly to whatever needs the session.

use std::{
    collections::HashMap,
    fmt,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::error::{PortalError, Result};

/// Store key holding the bearer token.
pub const TOKEN_KEY: &str = "token";
/// Store key holding the serialized user profile.
pub const USER_KEY: &str = "user";

/// Authenticated member session.
///
/// The token is redacted from `Debug` output and zeroized on drop.
#[derive(Clone, PartialEq, Deserialize, Serialize)]
pub struct Session {
    token: String,
    /// Profile blob returned by the backend at login.
    #[serde(default)]
    pub user: serde_json::Value,
}

impl Session {
    /// Creates a session.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::AuthRequired`] if the token is blank.
    pub fn new(token: impl Into<String>, user: serde_json::Value) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(PortalError::AuthRequired("session token is empty".to_owned()));
        }
        Ok(Self { token, user })
    }

    /// Returns the bearer token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Best-effort display name from the profile blob.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        ["fullname", "name", "email"]
            .iter()
            .find_map(|key| self.user.get(key).and_then(serde_json::Value::as_str))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.token.zeroize();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("token", &"[REDACTED]").field("user", &self.user).finish()
    }
}

/// Durable string key-value storage for session data.
pub trait SessionStore: Send + Sync {
    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::SessionStore`] if the backing storage fails.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::SessionStore`] if the backing storage fails.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Writes several values.
    ///
    /// The default writes them one at a time, so a failure can leave earlier
    /// entries behind. Stores that can commit all entries at once override it.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::SessionStore`] if the backing storage fails.
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        entries.iter().try_for_each(|(key, value)| self.set(key, value))
    }

    /// Removes a value. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::SessionStore`] if the backing storage fails.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Session store backed by a JSON file.
///
/// The file holds one flat JSON object of string values. Writes go to a
/// sibling temporary file, created owner-only on unix, which is then renamed
/// over the original.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Creates a store at `path`. Nothing is touched until the first access.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                PortalError::SessionStore(format!("corrupt session file {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(PortalError::SessionStore(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(PortalError::SessionStore(
                    format!("cannot remove {}: {e}", self.path.display()),
                )),
                _ => Ok(()),
            };
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                PortalError::SessionStore(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let body = serde_json::to_vec_pretty(entries)
            .map_err(|e| PortalError::SessionStore(format!("cannot encode session: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        write_private(&tmp, &body).map_err(|e| {
            PortalError::SessionStore(format!("cannot write {}: {e}", tmp.display()))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            PortalError::SessionStore(format!("cannot replace {}: {e}", self.path.display()))
        })
    }
}

/// Writes `body` to a fresh file at `path`. A leftover file from an
/// interrupted write is removed first so its permissions are not inherited.
fn write_private(path: &Path, body: &[u8]) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
        _ => {},
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(body)?;
    file.sync_all()
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value)])
    }

    fn set_many(&self, updates: &[(&str, &str)]) -> Result<()> {
        let mut entries = self.read_all()?;
        for (key, value) in updates {
            entries.insert((*key).to_owned(), (*value).to_owned());
        }
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| PortalError::SessionStore("session store lock poisoned".to_owned()))
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn set_many(&self, updates: &[(&str, &str)]) -> Result<()> {
        let mut entries = self.lock()?;
        for (key, value) in updates {
            entries.insert((*key).to_owned(), (*value).to_owned());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        (**self).set_many(entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// Process-wide authentication context.
///
/// Created once with [`SessionContext::init`], which reads the store a single
/// time; afterwards the in-memory copy is authoritative and every change is
/// written through to the store.
#[derive(Debug)]
pub struct SessionContext<S: SessionStore> {
    store: S,
    session: Option<Session>,
}

impl<S: SessionStore> SessionContext<S> {
    /// Reads the persisted session.
    ///
    /// A stored user profile that is not valid JSON is replaced by `null`
    /// rather than failing start-up.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::SessionStore`] if the store cannot be read.
    pub fn init(store: S) -> Result<Self> {
        let session = match store.get(TOKEN_KEY)? {
            Some(token) if !token.trim().is_empty() => {
                let user = store
                    .get(USER_KEY)?
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or(serde_json::Value::Null);
                Some(Session { token, user })
            },
            _ => None,
        };
        debug!(authenticated = session.is_some(), "session context initialized");
        Ok(Self { store, session })
    }

    /// Returns the current session, if logged in.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Whether a session is present.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// Persists a freshly issued session.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::SessionStore`] if the store write fails. The
    /// in-memory session is left unchanged and no token stays in the store.
    pub fn login(&mut self, session: Session) -> Result<()> {
        let user = serde_json::to_string(&session.user)
            .map_err(|e| PortalError::SessionStore(format!("cannot encode user profile: {e}")))?;
        if let Err(e) = self.store.set_many(&[(TOKEN_KEY, session.token()), (USER_KEY, &user)]) {
            if let Err(cleanup) = self.store.remove(TOKEN_KEY) {
                warn!(error = %cleanup, "could not discard partially stored session");
            }
            return Err(e);
        }
        info!("member logged in");
        self.session = Some(session);
        Ok(())
    }

    /// Clears the session from memory and from the store.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::SessionStore`] if the store cannot be cleared.
    /// The in-memory session is dropped regardless.
    pub fn logout(&mut self) -> Result<()> {
        self.session = None;
        self.store.remove(TOKEN_KEY)?;
        self.store.remove(USER_KEY)?;
        info!("member logged out");
        Ok(())
    }

    /// Returns the backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Memory store whose writes to one key always fail.
    struct RejectingStore {
        inner: MemorySessionStore,
        rejected: &'static str,
    }

    impl SessionStore for RejectingStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == self.rejected {
                return Err(PortalError::SessionStore("disk full".to_owned()));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    fn sample_session() -> Session {
        Session::new("tok_abc", json!({ "fullname": "Ada Lovelace", "email": "ada@example.com" }))
            .unwrap()
    }

    #[test]
    fn test_session_rejects_blank_token() {
        assert!(Session::new("  ", json!(null)).is_err());
    }

    #[test]
    fn test_session_debug_redacts_token() {
        let debug = format!("{:?}", sample_session());
        assert!(!debug.contains("tok_abc"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_dropping_clone_keeps_original_token() {
        let session = sample_session();
        drop(session.clone());
        assert_eq!(session.token(), "tok_abc");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(sample_session().display_name(), Some("Ada Lovelace"));
        let anonymous = Session::new("t", json!({})).unwrap();
        assert_eq!(anonymous.display_name(), None);
    }

    #[test]
    fn test_context_starts_logged_out() {
        let ctx = SessionContext::init(MemorySessionStore::new()).unwrap();
        assert!(!ctx.is_authenticated());
    }

    #[test]
    fn test_login_writes_fixed_keys() {
        let mut ctx = SessionContext::init(MemorySessionStore::new()).unwrap();
        ctx.login(sample_session()).unwrap();

        assert!(ctx.is_authenticated());
        assert_eq!(ctx.store().get(TOKEN_KEY).unwrap().as_deref(), Some("tok_abc"));
        let user: serde_json::Value =
            serde_json::from_str(&ctx.store().get(USER_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(user["email"], "ada@example.com");
    }

    #[test]
    fn test_failed_login_leaves_no_token_behind() {
        let store = RejectingStore { inner: MemorySessionStore::new(), rejected: USER_KEY };
        let mut ctx = SessionContext::init(store).unwrap();

        let err = ctx.login(sample_session()).unwrap_err();
        assert!(matches!(err, PortalError::SessionStore(_)));
        assert!(!ctx.is_authenticated());
        assert!(ctx.store().get(TOKEN_KEY).unwrap().is_none());

        let reopened = SessionContext::init(ctx.store).unwrap();
        assert!(!reopened.is_authenticated());
    }

    #[test]
    fn test_logout_clears_store() {
        let mut ctx = SessionContext::init(MemorySessionStore::new()).unwrap();
        ctx.login(sample_session()).unwrap();
        ctx.logout().unwrap();

        assert!(!ctx.is_authenticated());
        assert!(ctx.store().get(TOKEN_KEY).unwrap().is_none());
        assert!(ctx.store().get(USER_KEY).unwrap().is_none());
    }

    #[test]
    fn test_init_tolerates_bad_user_blob() {
        let store = MemorySessionStore::new();
        store.set(TOKEN_KEY, "tok").unwrap();
        store.set(USER_KEY, "{not json").unwrap();

        let ctx = SessionContext::init(store).unwrap();
        let session = ctx.session().unwrap();
        assert_eq!(session.token(), "tok");
        assert!(session.user.is_null());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut ctx = SessionContext::init(FileSessionStore::new(&path)).unwrap();
        ctx.login(sample_session()).unwrap();
        assert!(path.exists());

        let reopened = SessionContext::init(FileSessionStore::new(&path)).unwrap();
        assert_eq!(reopened.session(), Some(&sample_session()));
    }

    #[test]
    fn test_file_store_logout_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut ctx = SessionContext::init(FileSessionStore::new(&path)).unwrap();
        ctx.login(sample_session()).unwrap();
        ctx.logout().unwrap();

        assert!(!path.exists());
        let reopened = SessionContext::init(FileSessionStore::new(&path)).unwrap();
        assert!(!reopened.is_authenticated());
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "garbage").unwrap();

        let err = FileSessionStore::new(&path).get(TOKEN_KEY).unwrap_err();
        assert!(matches!(err, PortalError::SessionStore(_)));
    }

    #[test]
    fn test_file_store_writes_both_keys_at_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = FileSessionStore::new(&path);
        store.set_many(&[(TOKEN_KEY, "tok"), (USER_KEY, "{}")]).unwrap();

        let raw: HashMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.len(), 2);
        assert!(!path.with_extension("tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_ignores_leftover_tmp_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, "stale").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        FileSessionStore::new(&path).set(TOKEN_KEY, "tok").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(FileSessionStore::new(&path).get(TOKEN_KEY).unwrap().as_deref(), Some("tok"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        FileSessionStore::new(&path).set(TOKEN_KEY, "tok").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
