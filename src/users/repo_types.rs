use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 or legacy hex, never exposed in JSON
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

/// Row to insert; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

impl NewUser {
    pub(crate) fn into_user(self, id: i32) -> User {
        User {
            id,
            name: self.name,
            email: self.email,
            password_hash: self.password_hash,
            bio: self.bio,
            avatar: self.avatar,
        }
    }
}
