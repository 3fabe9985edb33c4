//! Connection and user identity
//!
//! A username is the durable key for everything a person owns. A `ConnId`
//! only exists while a socket is open and is mapped to a username by
//! `Sessions`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const MAX_USERNAME_LEN: usize = 24;

/// Ephemeral transport connection id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Lookup key for a username (case-insensitive)
pub fn user_key(name: &str) -> String {
    name.to_lowercase()
}

/// Validate and normalize a requested username
pub fn normalize_username(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_USERNAME_LEN {
        return None;
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return None;
    }
    Some(name.to_string())
}

/// Live connections and the user each one speaks for
#[derive(Debug, Default)]
pub struct Sessions {
    by_conn: HashMap<ConnId, String>,
    // Join order, so listings are stable
    order: Vec<ConnId>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, conn: ConnId, username: String) {
        if self.by_conn.insert(conn, username).is_none() {
            self.order.push(conn);
        }
    }

    /// Remove a connection, returning the username it was bound to
    pub fn leave(&mut self, conn: ConnId) -> Option<String> {
        let name = self.by_conn.remove(&conn)?;
        self.order.retain(|c| *c != conn);
        Some(name)
    }

    pub fn username(&self, conn: ConnId) -> Option<&str> {
        self.by_conn.get(&conn).map(String::as_str)
    }

    pub fn is_connected(&self, conn: ConnId) -> bool {
        self.by_conn.contains_key(&conn)
    }

    pub fn len(&self) -> usize {
        self.by_conn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.order.iter().copied()
    }

    /// Online usernames in join order; a user with two tabs is listed once
    pub fn usernames(&self) -> Vec<String> {
        let mut seen = Vec::<String>::new();
        for conn in &self.order {
            if let Some(name) = self.by_conn.get(conn) {
                if !seen.iter().any(|s| user_key(s) == user_key(name)) {
                    seen.push(name.clone());
                }
            }
        }
        seen
    }

    /// Resolve an online user by case-insensitive name, returning its display spelling
    pub fn find_online(&self, name: &str) -> Option<String> {
        let key = user_key(name);
        self.order
            .iter()
            .filter_map(|conn| self.by_conn.get(conn))
            .find(|n| user_key(n) == key)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_username() {
        assert_eq!(normalize_username("  alice "), Some("alice".to_string()));
        assert_eq!(normalize_username(""), None);
        assert_eq!(normalize_username("two words"), None);
        assert_eq!(normalize_username(&"x".repeat(MAX_USERNAME_LEN + 1)), None);
    }

    #[test]
    fn test_sessions_resolve_case_insensitively() {
        let mut sessions = Sessions::new();
        sessions.join(ConnId(1), "Alice".to_string());
        sessions.join(ConnId(2), "bob".to_string());

        assert_eq!(sessions.find_online("ALICE"), Some("Alice".to_string()));
        assert_eq!(sessions.leave(ConnId(1)), Some("Alice".to_string()));
        assert!(sessions.find_online("alice").is_none());
        assert_eq!(sessions.usernames(), vec!["bob".to_string()]);
    }
}
