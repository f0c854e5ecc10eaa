use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identifier of one Save/Load/Delete batch.
///
/// At most one batch may be in flight per identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random identifier (UUID v4).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Absolute expiry of a stored chunk, as Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Expiry(pub u64);

impl Expiry {
    /// Expiry `ttl` from now.
    pub fn after(ttl: Duration) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self((now + ttl).as_secs())
    }

    pub fn is_past(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.0 <= now
    }
}

/// Who may read a stored chunk back from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "owner")]
pub enum Permission {
    /// Only the uploading client
    #[default]
    Private,
    /// A named principal
    Owner(String),
    /// Anyone holding the identifier
    Public,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_request_ids_differ() {
        assert_ne!(RequestId::random(), RequestId::random());
    }

    #[test]
    fn expiry_in_future_is_not_past() {
        assert!(!Expiry::after(Duration::from_secs(3600)).is_past());
        assert!(Expiry(0).is_past());
    }

    #[test]
    fn permission_parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            permission: Permission,
        }

        let w: Wrapper = toml::from_str(
            r#"
[permission]
kind = "owner"
owner = "alice"
"#,
        )
        .unwrap();
        assert_eq!(w.permission, Permission::Owner("alice".into()));
        assert_eq!(Permission::default(), Permission::Private);
    }
}
