//! Authorization predicates consulted by the executor and the sync service.
//!
//! Credential storage and grant bookkeeping live outside the engine; callers
//! inject an [`Authority`] implementation.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Statement-level permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::Select => "SELECT",
            Permission::Insert => "INSERT",
            Permission::Update => "UPDATE",
            Permission::Delete => "DELETE",
            Permission::Create => "CREATE",
            Permission::Alter => "ALTER",
            Permission::Drop => "DROP",
        };
        f.write_str(name)
    }
}

pub trait Authority: Send + Sync {
    fn verify_credentials(&self, username: &str, password: &str) -> bool;

    /// Whether `username` appears in `owner`'s children list.
    fn is_child(&self, owner: &str, username: &str) -> bool;

    fn is_admin(&self, username: &str) -> bool;

    fn is_authorized(&self, username: &str, permission: Permission) -> bool;
}

/// Grants everything to everyone. Useful for embedded single-user setups.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authority for AllowAll {
    fn verify_credentials(&self, _username: &str, _password: &str) -> bool {
        true
    }

    fn is_child(&self, _owner: &str, _username: &str) -> bool {
        true
    }

    fn is_admin(&self, _username: &str) -> bool {
        true
    }

    fn is_authorized(&self, _username: &str, _permission: Permission) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct UserEntry {
    password: String,
    admin: bool,
    children: HashSet<String>,
    permissions: HashSet<Permission>,
}

/// In-memory user table.
#[derive(Debug, Default)]
pub struct StaticAuthority {
    users: RwLock<HashMap<String, UserEntry>>,
}

impl StaticAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admins hold every permission.
    pub fn add_admin(&self, username: &str, password: &str) {
        self.users.write().insert(
            username.to_string(),
            UserEntry {
                password: password.to_string(),
                admin: true,
                ..UserEntry::default()
            },
        );
    }

    pub fn add_user(&self, username: &str, password: &str, permissions: &[Permission]) {
        self.users.write().insert(
            username.to_string(),
            UserEntry {
                password: password.to_string(),
                permissions: permissions.iter().copied().collect(),
                ..UserEntry::default()
            },
        );
    }

    /// Record `child` as authorized to clone/push `owner`'s databases.
    pub fn add_child(&self, owner: &str, child: &str) {
        if let Some(entry) = self.users.write().get_mut(owner) {
            entry.children.insert(child.to_string());
        }
    }

    pub fn grant(&self, username: &str, permission: Permission) {
        if let Some(entry) = self.users.write().get_mut(username) {
            entry.permissions.insert(permission);
        }
    }
}

impl Authority for StaticAuthority {
    fn verify_credentials(&self, username: &str, password: &str) -> bool {
        self.users
            .read()
            .get(username)
            .is_some_and(|u| u.password == password)
    }

    fn is_child(&self, owner: &str, username: &str) -> bool {
        self.users
            .read()
            .get(owner)
            .is_some_and(|u| u.children.contains(username))
    }

    fn is_admin(&self, username: &str) -> bool {
        self.users.read().get(username).is_some_and(|u| u.admin)
    }

    fn is_authorized(&self, username: &str, permission: Permission) -> bool {
        self.users
            .read()
            .get(username)
            .is_some_and(|u| u.admin || u.permissions.contains(&permission))
    }
}
