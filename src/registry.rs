//! In-memory user records keyed by name.

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};

/// A single user entry as exposed over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub age: Option<String>,
    pub occupation: Option<String>,
}

impl UserRecord {
    pub fn new(name: impl Into<String>, params: UserParams) -> Self {
        Self {
            name: name.into(),
            age: params.age,
            occupation: params.occupation,
        }
    }
}

/// The mutable fields of a user, as supplied by a request.
///
/// Both fields are optional; a missing value is stored as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserParams {
    pub age: Option<String>,
    pub occupation: Option<String>,
}

impl UserParams {
    pub fn new(age: impl Into<String>, occupation: impl Into<String>) -> Self {
        Self {
            age: Some(age.into()),
            occupation: Some(occupation.into()),
        }
    }
}

/// Outcome of [`UserRegistry::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted {
    Updated(UserRecord),
    Created(UserRecord),
}

impl Upserted {
    pub fn record(&self) -> &UserRecord {
        match self {
            Upserted::Updated(user) | Upserted::Created(user) => user,
        }
    }
}

/// Ordered collection of users.
///
/// Lookups and updates act on the first record with a matching name, while
/// [`UserRegistry::delete`] removes every match.
#[derive(Debug, Clone, Default)]
pub struct UserRegistry {
    users: Vec<UserRecord>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from existing records, duplicates included.
    pub fn with_users(users: Vec<UserRecord>) -> Self {
        Self { users }
    }

    pub fn find(&self, name: &str) -> Option<&UserRecord> {
        self.users.iter().find(|user| user.name == name)
    }

    /// Appends a new user unless one with the same name already exists.
    pub fn create(&mut self, name: &str, params: UserParams) -> Result<UserRecord> {
        if self.find(name).is_some() {
            return Err(RegistryError::Conflict(name.to_string()));
        }

        let user = UserRecord::new(name, params);
        self.users.push(user.clone());
        Ok(user)
    }

    pub fn upsert(&mut self, name: &str, params: UserParams) -> Upserted {
        if let Some(user) = self.users.iter_mut().find(|user| user.name == name) {
            user.age = params.age;
            user.occupation = params.occupation;
            return Upserted::Updated(user.clone());
        }

        let user = UserRecord::new(name, params);
        self.users.push(user.clone());
        Upserted::Created(user)
    }

    /// Removes all users with the given name and returns how many were dropped.
    pub fn delete(&mut self, name: &str) -> usize {
        let before = self.users.len();
        self.users.retain(|user| user.name != name);
        before - self.users.len()
    }

    pub fn users(&self) -> &[UserRecord] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Records every fresh process starts with.
pub fn default_seed() -> Vec<UserRecord> {
    [
        ("Jonas", "12", "Network Engineer"),
        ("Viktor", "13", "Doctor"),
        ("Jerret", "14", "Web Developer"),
        ("Martin", "15", "Cleaner"),
    ]
    .into_iter()
    .map(|(name, age, occupation)| UserRecord::new(name, UserParams::new(age, occupation)))
    .collect()
}
