use serde::{Deserialize, Serialize};

pub use api::response::Role;

/// Identity carried by a verified bearer credential.
///
/// Token issuance lives outside this system; a token is only ever
/// decoded here, never minted on a request path. `Keys` exists so
/// tooling and tests can sign tokens with the shared secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

pub const ANY_ID: &str = "*";

impl Claims {
    /// Claims granted when auth is not configured or a static
    /// operator token matched.
    pub fn open() -> Self {
        Claims {
            sub: ANY_ID.to_string(),
            role: Role::Admin,
            exp: 0,
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Moderator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevated_roles() {
        let mut claims = Claims::open();
        assert!(claims.is_elevated());

        claims.role = Role::Moderator;
        assert!(claims.is_elevated());

        claims.role = Role::Dj;
        assert!(!claims.is_elevated());

        claims.role = Role::Listener;
        assert!(!claims.is_elevated());
    }

    #[test]
    fn test_role_wire_format() {
        assert_eq!(serde_json::to_string(&Role::Dj).unwrap(), "\"dj\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"moderator\"").unwrap(),
            Role::Moderator
        );
    }
}
