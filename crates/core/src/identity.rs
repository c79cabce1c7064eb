//! Local Identity Store
//!
//! Usernames, passwords and profiles kept in a local key-value store. There is
//! no hashing and no expiry; this is only meant for a single local student.
//!
//! Two records are kept: `currentUser` holds the logged-in profile and
//! `usersDirectory` maps every username to its stored credentials.

use crate::profile::{ProfileUpdate, ProficiencyLevel, TargetLanguage, UserProfile};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

pub const CURRENT_USER_KEY: &str = "currentUser";
pub const USERS_DIRECTORY_KEY: &str = "usersDirectory";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to access store file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),
    #[error("No user named '{0}'")]
    UnknownUser(String),
    #[error("Wrong password")]
    WrongPassword,
    #[error("Nobody is logged in")]
    NotLoggedIn,
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A string key-value store, in the manner of browser local storage.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// An in-memory store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// A store persisted as a single JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "Opened key-value store");
        Ok(Self { path, entries })
    }

    fn flush(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // Staged and renamed: the store file is always a complete record.
        let staging = self.staging_path();
        fs::write(&staging, serde_json::to_string_pretty(&self.entries)?)?;
        if let Err(e) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let previous = self.entries.insert(key.to_string(), value);
        if let Err(e) = self.flush() {
            match previous {
                Some(old) => self.entries.insert(key.to_string(), old),
                None => self.entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if let Some(old) = self.entries.remove(key) {
            if let Err(e) = self.flush() {
                self.entries.insert(key.to_string(), old);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// One entry of the users directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUser {
    pub password: String,
    pub level: ProficiencyLevel,
    pub target_language: TargetLanguage,
}

pub struct IdentityStore<S: KeyValueStore> {
    store: S,
    directory: BTreeMap<String, StoredUser>,
    current: Option<UserProfile>,
}

impl<S: KeyValueStore> IdentityStore<S> {
    /// Reads both records from `store`. Missing records start empty.
    pub fn load(store: S) -> Result<Self, StoreError> {
        let directory = match store.get(USERS_DIRECTORY_KEY)? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => BTreeMap::new(),
        };
        let current = match store.get(CURRENT_USER_KEY)? {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        info!(users = directory.len(), "Identity store loaded");
        Ok(Self {
            store,
            directory,
            current,
        })
    }

    pub fn current_user(&self) -> Option<&UserProfile> {
        self.current.as_ref()
    }

    pub fn user_count(&self) -> usize {
        self.directory.len()
    }

    /// Creates an account and logs it in.
    pub fn register(
        &mut self,
        username: &str,
        password: &str,
        level: ProficiencyLevel,
        target_language: TargetLanguage,
    ) -> Result<UserProfile, IdentityError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(IdentityError::InvalidInput(
                "Username must not be empty".to_string(),
            ));
        }
        if password.is_empty() {
            return Err(IdentityError::InvalidInput(
                "Password must not be empty".to_string(),
            ));
        }
        if self.directory.contains_key(username) {
            return Err(IdentityError::UsernameTaken(username.to_string()));
        }

        let previous = self.directory.clone();
        let mut directory = previous.clone();
        directory.insert(
            username.to_string(),
            StoredUser {
                password: password.to_string(),
                level,
                target_language,
            },
        );
        self.save_directory(&directory)?;
        self.directory = directory;

        let profile = UserProfile {
            username: username.to_string(),
            proficiency_level: level,
            target_language,
        };
        if let Err(e) = self.set_current(Some(profile.clone())) {
            // Without a login the account must not exist either.
            if let Err(rollback) = self.save_directory(&previous) {
                warn!(%username, error = %rollback, "Failed to roll back registration");
            }
            self.directory = previous;
            return Err(e.into());
        }
        info!(%username, "Registered new user");
        Ok(profile)
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<UserProfile, IdentityError> {
        let username = username.trim();
        let stored = self
            .directory
            .get(username)
            .ok_or_else(|| IdentityError::UnknownUser(username.to_string()))?;
        if stored.password != password {
            return Err(IdentityError::WrongPassword);
        }

        let profile = UserProfile {
            username: username.to_string(),
            proficiency_level: stored.level,
            target_language: stored.target_language,
        };
        self.set_current(Some(profile.clone()))?;
        info!(%username, "User logged in");
        Ok(profile)
    }

    pub fn logout(&mut self) -> Result<(), IdentityError> {
        self.set_current(None)?;
        Ok(())
    }

    /// Merges `update` into the current profile and its directory entry.
    pub fn update_profile(&mut self, update: &ProfileUpdate) -> Result<UserProfile, IdentityError> {
        let mut profile = self.current.clone().ok_or(IdentityError::NotLoggedIn)?;
        profile.apply(update);

        let mut directory = self.directory.clone();
        if let Some(entry) = directory.get_mut(&profile.username) {
            entry.level = profile.proficiency_level;
            entry.target_language = profile.target_language;
        }
        self.save_directory(&directory)?;
        self.directory = directory;
        self.set_current(Some(profile.clone()))?;
        info!(username = %profile.username, "Profile updated");
        Ok(profile)
    }

    fn save_directory(&mut self, directory: &BTreeMap<String, StoredUser>) -> Result<(), StoreError> {
        self.store
            .set(USERS_DIRECTORY_KEY, serde_json::to_string(directory)?)
    }

    fn set_current(&mut self, profile: Option<UserProfile>) -> Result<(), StoreError> {
        match &profile {
            Some(p) => self.store.set(CURRENT_USER_KEY, serde_json::to_string(p)?)?,
            None => self.store.remove(CURRENT_USER_KEY)?,
        }
        self.current = profile;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_with_anna() -> IdentityStore<MemoryStore> {
        let mut identity = IdentityStore::load(MemoryStore::default()).unwrap();
        identity
            .register("anna", "secret", ProficiencyLevel::A2, TargetLanguage::English)
            .unwrap();
        identity
    }

    #[test]
    fn test_register_logs_in() {
        let identity = store_with_anna();
        let current = identity.current_user().unwrap();
        assert_eq!(current.username, "anna");
        assert_eq!(current.proficiency_level, ProficiencyLevel::A2);
    }

    #[test]
    fn test_duplicate_registration_leaves_store_unchanged() {
        let mut identity = store_with_anna();
        let directory_before = identity.store.get(USERS_DIRECTORY_KEY).unwrap();
        let current_before = identity.store.get(CURRENT_USER_KEY).unwrap();

        let err = identity
            .register("anna", "other", ProficiencyLevel::C2, TargetLanguage::Russian)
            .unwrap_err();
        assert!(matches!(err, IdentityError::UsernameTaken(name) if name == "anna"));

        assert_eq!(identity.store.get(USERS_DIRECTORY_KEY).unwrap(), directory_before);
        assert_eq!(identity.store.get(CURRENT_USER_KEY).unwrap(), current_before);
        assert_eq!(identity.user_count(), 1);
    }

    #[test]
    fn test_wrong_password_leaves_store_unchanged() {
        let mut identity = store_with_anna();
        identity.logout().unwrap();

        let err = identity.login("anna", "nope").unwrap_err();
        assert!(matches!(err, IdentityError::WrongPassword));
        assert!(identity.current_user().is_none());
        assert!(identity.store.get(CURRENT_USER_KEY).unwrap().is_none());
    }

    #[test]
    fn test_login_unknown_user() {
        let mut identity = store_with_anna();
        let err = identity.login("boris", "secret").unwrap_err();
        assert!(matches!(err, IdentityError::UnknownUser(name) if name == "boris"));
        assert_eq!(identity.current_user().unwrap().username, "anna");
    }

    #[test]
    fn test_login_restores_stored_profile() {
        let mut identity = store_with_anna();
        identity
            .register("boris", "pw", ProficiencyLevel::C1, TargetLanguage::Russian)
            .unwrap();
        let profile = identity.login("anna", "secret").unwrap();
        assert_eq!(profile.target_language, TargetLanguage::English);
        assert_eq!(identity.current_user().unwrap().username, "anna");
    }

    #[test]
    fn test_empty_credentials_are_rejected() {
        let mut identity = IdentityStore::load(MemoryStore::default()).unwrap();
        assert!(matches!(
            identity.register("  ", "pw", ProficiencyLevel::A1, TargetLanguage::English),
            Err(IdentityError::InvalidInput(_))
        ));
        assert!(matches!(
            identity.register("kim", "", ProficiencyLevel::A1, TargetLanguage::English),
            Err(IdentityError::InvalidInput(_))
        ));
        assert_eq!(identity.user_count(), 0);
    }

    #[test]
    fn test_update_profile_persists_both_records() {
        let mut identity = store_with_anna();
        identity
            .update_profile(&ProfileUpdate {
                proficiency_level: Some(ProficiencyLevel::B2),
                target_language: Some(TargetLanguage::Russian),
            })
            .unwrap();

        let current: UserProfile =
            serde_json::from_str(&identity.store.get(CURRENT_USER_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(current.proficiency_level, ProficiencyLevel::B2);

        let directory: BTreeMap<String, StoredUser> =
            serde_json::from_str(&identity.store.get(USERS_DIRECTORY_KEY).unwrap().unwrap())
                .unwrap();
        assert_eq!(directory["anna"].level, ProficiencyLevel::B2);
        assert_eq!(directory["anna"].target_language, TargetLanguage::Russian);
        assert_eq!(directory["anna"].password, "secret");
    }

    #[test]
    fn test_update_profile_requires_login() {
        let mut identity = store_with_anna();
        identity.logout().unwrap();
        assert!(matches!(
            identity.update_profile(&ProfileUpdate::default()),
            Err(IdentityError::NotLoggedIn)
        ));
    }

    #[test]
    fn test_file_store_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        {
            let mut identity = IdentityStore::load(JsonFileStore::open(&path).unwrap()).unwrap();
            identity
                .register("lena", "pw", ProficiencyLevel::B1, TargetLanguage::Russian)
                .unwrap();
        }

        let identity = IdentityStore::load(JsonFileStore::open(&path).unwrap()).unwrap();
        assert_eq!(identity.user_count(), 1);
        assert_eq!(identity.current_user().unwrap().username, "lena");

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains(CURRENT_USER_KEY));
        assert!(raw.contains(USERS_DIRECTORY_KEY));
    }

    /// Fails every write to `currentUser`.
    #[derive(Default)]
    struct LoginFailingStore {
        inner: MemoryStore,
    }

    impl KeyValueStore for LoginFailingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
            if key == CURRENT_USER_KEY {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.set(key, value)
        }

        fn remove(&mut self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_failed_login_after_register_rolls_back_account() {
        let mut identity = IdentityStore::load(LoginFailingStore::default()).unwrap();

        let err = identity
            .register("anna", "secret", ProficiencyLevel::A2, TargetLanguage::English)
            .unwrap_err();
        assert!(matches!(err, IdentityError::Store(StoreError::Io(_))));

        assert_eq!(identity.user_count(), 0);
        assert!(identity.current_user().is_none());
        let directory: BTreeMap<String, StoredUser> =
            serde_json::from_str(&identity.store.get(USERS_DIRECTORY_KEY).unwrap().unwrap())
                .unwrap();
        assert!(directory.is_empty());
    }

    #[test]
    fn test_file_store_leaves_no_staging_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        store.set("greeting", "hello".to_string()).unwrap();
        store.set("greeting", "hi".to_string()).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("store.json")]);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("greeting").unwrap().as_deref(), Some("hi"));
    }

    #[test]
    fn test_file_store_ignores_stale_staging_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(dir.path().join("store.json.tmp"), "{\"half\": ").unwrap();

        let mut store = JsonFileStore::open(&path).unwrap();
        store.set("k", "v".to_string()).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(JsonFileStore::open(&path), Err(StoreError::Json(_))));
    }
}
