//! Daemon identity: instance UUID, cookie secret and account resolution.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdentityError;

/// Number of random bytes in a generated secret.
pub const SECRET_LEN: usize = 64;
/// Shortest secret accepted for cookie encryption.
pub const MIN_COOKIE_SECRET_LEN: usize = 36;

/// Random key material persisted as base64.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Generates a fresh secret from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0_u8; SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps existing key material.
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({} bytes)", self.0.len())
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map(Self)
            .map_err(|error| D::Error::custom(format!("secret is not valid base64: {error}")))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AccountValue {
    Name(String),
    Id(u64),
}

impl From<AccountValue> for String {
    fn from(value: AccountValue) -> Self {
        match value {
            AccountValue::Name(name) => name,
            AccountValue::Id(id) => id.to_string(),
        }
    }
}

/// Accepts a user or group written either as a name or as a number.
pub(crate) fn deserialize_account<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<AccountValue>::deserialize(deserializer)?.map(String::from))
}

/// List form of [`deserialize_account`].
pub(crate) fn deserialize_accounts<'de, D>(
    deserializer: D,
) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<AccountValue>>::deserialize(deserializer)?
        .map(|values| values.into_iter().map(String::from).collect()))
}

/// Resolves a user name or numeric id.
pub fn resolve_user(spec: &str) -> Result<u32, IdentityError> {
    if let Ok(id) = spec.parse::<u32>() {
        return Ok(id);
    }
    lookup_user(spec)
}

/// Resolves a group name or numeric id.
pub fn resolve_group(spec: &str) -> Result<u32, IdentityError> {
    if let Ok(id) = spec.parse::<u32>() {
        return Ok(id);
    }
    lookup_group(spec)
}

/// Name of the user running the process, used to derive default database
/// names.
#[must_use]
pub fn current_user_name() -> String {
    #[cfg(unix)]
    {
        if let Ok(Some(user)) = nix::unistd::User::from_uid(nix::unistd::getuid()) {
            return user.name;
        }
    }
    std::env::var("USER").unwrap_or_else(|_| "axon".to_owned())
}

#[cfg(unix)]
fn lookup_user(name: &str) -> Result<u32, IdentityError> {
    match nix::unistd::User::from_name(name) {
        Ok(Some(user)) => Ok(user.uid.as_raw()),
        Ok(None) => Err(IdentityError::UnknownUser {
            name: name.to_owned(),
        }),
        Err(errno) => Err(IdentityError::Lookup {
            name: name.to_owned(),
            message: errno.to_string(),
        }),
    }
}

#[cfg(unix)]
fn lookup_group(name: &str) -> Result<u32, IdentityError> {
    match nix::unistd::Group::from_name(name) {
        Ok(Some(group)) => Ok(group.gid.as_raw()),
        Ok(None) => Err(IdentityError::UnknownGroup {
            name: name.to_owned(),
        }),
        Err(errno) => Err(IdentityError::Lookup {
            name: name.to_owned(),
            message: errno.to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn lookup_user(name: &str) -> Result<u32, IdentityError> {
    Err(IdentityError::Unsupported {
        name: name.to_owned(),
    })
}

#[cfg(not(unix))]
fn lookup_group(name: &str) -> Result<u32, IdentityError> {
    Err(IdentityError::Unsupported {
        name: name.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn generated_secrets_are_long_and_distinct() {
        let first = Secret::generate();
        let second = Secret::generate();
        assert_eq!(first.len(), SECRET_LEN);
        assert_ne!(first, second);
    }

    #[rstest]
    fn secret_debug_output_is_redacted() {
        let secret = Secret::from_bytes(vec![7; 4]);
        assert_eq!(format!("{secret:?}"), "Secret(4 bytes)");
    }

    #[rstest]
    #[case("0", 0)]
    #[case("1000", 1000)]
    fn numeric_accounts_resolve_without_lookup(#[case] spec: &str, #[case] expected: u32) {
        assert_eq!(resolve_user(spec).expect("numeric uid"), expected);
        assert_eq!(resolve_group(spec).expect("numeric gid"), expected);
    }

    #[cfg(unix)]
    #[rstest]
    fn root_resolves_to_zero() {
        assert_eq!(resolve_user("root").expect("root user exists"), 0);
    }

    #[cfg(unix)]
    #[rstest]
    fn unknown_users_are_reported() {
        let error = resolve_user("axon-no-such-user").expect_err("lookup must fail");
        assert!(matches!(error, IdentityError::UnknownUser { .. }));
    }
}
