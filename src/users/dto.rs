use serde::{Deserialize, Deserializer, Serialize};

/// Request body for user registration.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserDto {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginUserDto {
    pub email: String,
    pub password: String,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserDto {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    /// `Some(Some(v))` = set, `Some(None)` = clear, `None` = no change.
    #[serde(default, deserialize_with = "nullable")]
    pub bio: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub avatar: Option<Option<String>>,
}

/// Keeps an explicit `null` apart from a missing field.
fn nullable<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub name: String,
    pub email: String,
    pub bio: Option<String>,
    pub token: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub user: UserView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub affected: u64,
}
