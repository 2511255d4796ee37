//! Authentication hook for the login sequence.
//!
//! Blockwire does not talk to any account service itself. The login
//! handler calls an [`Authenticator`] with the name from `LoginStart` and
//! uses the [`GameProfile`] it returns for `LoginSuccess`. Servers that
//! verify accounts plug in their own implementation; the default
//! [`OfflineAuthenticator`] trusts the client.

use uuid::Uuid;

use crate::SessionError;

/// Identity of a logged-in player.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GameProfile {
    /// Hyphenated UUID.
    pub uuid: String,
    pub name: String,
}

/// Resolves a player name to a profile, or rejects the login.
///
/// # Example
///
/// ```rust
/// use blockwire_session::{Authenticator, GameProfile, SessionError};
///
/// /// Only lets in names on a fixed list.
/// struct Whitelist(Vec<String>);
///
/// impl Authenticator for Whitelist {
///     async fn authenticate(
///         &self,
///         name: &str,
///     ) -> Result<GameProfile, SessionError> {
///         if !self.0.iter().any(|n| n == name) {
///             return Err(SessionError::AuthFailed(
///                 "You are not white-listed on this server!".into(),
///             ));
///         }
///         Ok(GameProfile {
///             uuid: "00000000-0000-0000-0000-000000000000".into(),
///             name: name.to_owned(),
///         })
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Authenticates `name`.
    ///
    /// # Errors
    /// [`SessionError::AuthFailed`] with the text the player should see.
    fn authenticate(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<GameProfile, SessionError>> + Send;
}

/// Accepts every name and derives a stable name-based UUID from it.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineAuthenticator;

impl OfflineAuthenticator {
    /// The UUID a name always maps to in offline mode.
    pub fn offline_uuid(name: &str) -> Uuid {
        Uuid::new_v3(
            &Uuid::NAMESPACE_OID,
            format!("OfflinePlayer:{name}").as_bytes(),
        )
    }
}

impl Authenticator for OfflineAuthenticator {
    async fn authenticate(
        &self,
        name: &str,
    ) -> Result<GameProfile, SessionError> {
        if name.is_empty() {
            return Err(SessionError::AuthFailed("Invalid username".into()));
        }
        Ok(GameProfile {
            uuid: Self::offline_uuid(name).hyphenated().to_string(),
            name: name.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_uuid_is_stable_per_name() {
        let a = OfflineAuthenticator.authenticate("Steve").await.unwrap();
        let b = OfflineAuthenticator.authenticate("Steve").await.unwrap();
        let c = OfflineAuthenticator.authenticate("Alex").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a.uuid, c.uuid);
        assert_eq!(a.uuid.len(), 36);
        assert_eq!(a.name, "Steve");
    }

    #[tokio::test]
    async fn test_offline_rejects_empty_name() {
        assert!(matches!(
            OfflineAuthenticator.authenticate("").await,
            Err(SessionError::AuthFailed(_))
        ));
    }
}
