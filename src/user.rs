use dashmap::DashMap;

use api::response::Role;

/// Account state for a known user. Credential verification happens in
/// the auth layer; this directory is the authority for role and
/// account standing.
#[derive(Clone, Debug)]
pub struct User {
    pub username: String,
    pub role: Role,
    pub active: bool,
}

#[derive(Default)]
pub struct UserDirectory {
    users: DashMap<String, User>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn upsert(&self, user: User) {
        self.users.insert(user.username.clone(), user);
    }

    pub fn get(&self, username: &str) -> Option<User> {
        self.users.get(username).map(|user| user.clone())
    }

    pub fn role(&self, username: &str) -> Option<Role> {
        self.users.get(username).map(|user| user.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_get() {
        let directory = UserDirectory::new();
        assert!(directory.get("dj.jane").is_none());

        directory.upsert(User {
            username: "dj.jane".to_string(),
            role: Role::Dj,
            active: true,
        });
        assert_eq!(directory.role("dj.jane"), Some(Role::Dj));

        directory.upsert(User {
            username: "dj.jane".to_string(),
            role: Role::Dj,
            active: false,
        });
        assert!(!directory.get("dj.jane").unwrap().active);
    }
}
