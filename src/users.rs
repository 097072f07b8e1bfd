use crate::game::types::Avatar;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Durable in-process identity. Created on first sight of a username, never
/// mutated or destroyed afterwards.
#[derive(Debug)]
pub struct Profile {
    pub user_id: String,
    pub username: String,
    pub avatar: Avatar,
}

#[derive(Debug, Default)]
pub struct UserRegistry {
    by_username: Mutex<HashMap<String, Arc<Profile>>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the profile for `username`, creating it on first sight. The
    /// boolean reports whether it already existed; for a preexisting profile
    /// the supplied avatar is ignored.
    pub fn get_or_create(&self, username: &str, avatar: Avatar) -> (Arc<Profile>, bool) {
        let mut by_username = self.by_username.lock().unwrap();
        if let Some(profile) = by_username.get(username) {
            return (Arc::clone(profile), true);
        }
        let profile = Arc::new(Profile {
            user_id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            avatar,
        });
        by_username.insert(username.to_string(), Arc::clone(&profile));
        tracing::debug!(user_id = %profile.user_id, username = %profile.username, "created profile");
        (profile, false)
    }

    pub fn exists(&self, username: &str) -> bool {
        self.by_username.lock().unwrap().contains_key(username)
    }
}
