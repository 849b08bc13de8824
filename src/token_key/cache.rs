//! Write-through file cache of issuer public keys
//!
//! One JSON file per issuer: `<dir>/auth-<issuer>.pub`. Lets a restarted
//! component validate end-user tokens before its first successful refresh.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use super::TokenKey;
use crate::{Error, Result};

/// Distinguishes temp files of overlapping saves within one process
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File cache of issuer token keys
#[derive(Debug, Clone)]
pub struct TokenKeyCache {
    dir: PathBuf,
}

impl TokenKeyCache {
    /// Cache rooted at `dir` (normally the component key directory)
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file for `issuer`
    pub fn path(&self, issuer: &str) -> PathBuf {
        self.dir.join(format!("auth-{issuer}.pub"))
    }

    /// Load the cached key for `issuer`
    ///
    /// Missing files yield `None`; unreadable or corrupt ones are logged and
    /// also yield `None`.
    pub fn load(&self, issuer: &str) -> Option<TokenKey> {
        let path = self.path(issuer);

        if !path.exists() {
            debug!(issuer = %issuer, "No cached token key");
            return None;
        }

        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<TokenKey>(&content) {
                Ok(key) => {
                    debug!(issuer = %issuer, fingerprint = %key.fingerprint(), "Loaded cached token key");
                    Some(key)
                }
                Err(e) => {
                    warn!(issuer = %issuer, path = %path.display(), error = %e, "Failed to parse cached token key");
                    None
                }
            },
            Err(e) => {
                warn!(issuer = %issuer, path = %path.display(), error = %e, "Failed to read cached token key");
                None
            }
        }
    }

    /// Persist `key` for `issuer` (temp file then rename, owner-only permissions)
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, issuer: &str, key: &TokenKey) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Config(format!(
                "Cannot create key cache dir '{}': {e}",
                self.dir.display()
            ))
        })?;

        let path = self.path(issuer);
        let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!(".auth-{issuer}.pub.{}.{seq}.tmp", std::process::id()));

        let content = serde_json::to_string_pretty(key)?;
        fs::write(&tmp, content)?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, &path)?;

        debug!(issuer = %issuer, path = %path.display(), "Saved token key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TokenKey {
        TokenKey::new("ES256", "-----BEGIN PUBLIC KEY-----\nabc\n-----END PUBLIC KEY-----\n")
    }

    #[test]
    fn path_uses_issuer_id() {
        let cache = TokenKeyCache::new("/var/keys");
        assert_eq!(cache.path("main"), PathBuf::from("/var/keys/auth-main.pub"));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenKeyCache::new(dir.path().join("nested"));

        cache.save("main", &key()).unwrap();

        assert_eq!(cache.load("main"), Some(key()));
        let leftovers = fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn overlapping_saves_all_succeed() {
        // GIVEN: several writers saving the same issuer at once
        let dir = tempfile::tempdir().unwrap();
        let cache = &TokenKeyCache::new(dir.path());

        // WHEN: they all save concurrently
        let results: Vec<Result<()>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(move || (0..20).try_for_each(|_| cache.save("main", &key()))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // THEN: no save lost its temp file, and only the cache file remains
        assert!(results.iter().all(std::result::Result::is_ok));
        assert_eq!(cache.load("main"), Some(key()));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn missing_and_corrupt_files_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenKeyCache::new(dir.path());
        assert_eq!(cache.load("main"), None);

        fs::write(cache.path("main"), "{not json").unwrap();
        assert_eq!(cache.load("main"), None);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenKeyCache::new(dir.path());
        cache.save("main", &key()).unwrap();
        let mode = fs::metadata(cache.path("main")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
