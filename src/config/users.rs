//! User directory for resolving updater IDs to display names.
//!
//! Rules record who last changed them by ID only. A [`UserDirectory`] turns that
//! ID into something readable; names are optional and lookups never fail.

use std::collections::HashMap;

/// Maximum number of `USER_ID_<n>` / `USER_NAME_<n>` pairs read from the environment.
const MAX_ENV_USERS: usize = 32;

/// Resolves user IDs to display names.
pub trait UserDirectory: Send + Sync {
    /// Returns the display name for `user_id`, if one is known.
    fn display_name(&self, user_id: &str) -> Option<String>;
}

/// A fixed, in-memory directory.
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    names: HashMap<String, String>,
}

impl<K, V> FromIterator<(K, V)> for StaticUserDirectory
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            names: iter
                .into_iter()
                .map(|(id, name)| (id.into(), name.into()))
                .collect(),
        }
    }
}

impl UserDirectory for StaticUserDirectory {
    fn display_name(&self, user_id: &str) -> Option<String> {
        self.names.get(user_id).cloned()
    }
}

/// Directory built from `USER_ID_<n>` and `USER_NAME_<n>` environment variables,
/// for `n` starting at 1. Reading stops at the first missing pair.
#[derive(Debug, Clone, Default)]
pub struct EnvUserDirectory {
    inner: StaticUserDirectory,
}

impl EnvUserDirectory {
    /// Reads the user mapping from the environment (typically loaded from `.env`).
    #[must_use]
    pub fn from_env() -> Self {
        let pairs = (1..=MAX_ENV_USERS).map_while(|n| {
            match (
                std::env::var(format!("USER_ID_{n}")),
                std::env::var(format!("USER_NAME_{n}")),
            ) {
                (Ok(id), Ok(name)) => Some((id, name)),
                _ => None,
            }
        });
        Self {
            inner: pairs.collect(),
        }
    }
}

impl UserDirectory for EnvUserDirectory {
    fn display_name(&self, user_id: &str) -> Option<String> {
        self.inner.display_name(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_directory_lookup() {
        let directory = StaticUserDirectory::from_iter([("u-1", "Alice"), ("u-2", "Bob")]);
        assert_eq!(directory.display_name("u-2").as_deref(), Some("Bob"));
        assert_eq!(directory.display_name("u-3"), None);
    }

    #[test]
    fn test_env_directory_returns_none_when_not_found() {
        let directory = EnvUserDirectory::from_env();
        // Will be None unless this exact ID is configured
        assert_eq!(directory.display_name("nonexistent_user_id"), None);
    }
}
