use serde::{Deserialize, Serialize};

/// JWT payload issued with every user view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub id: i32,          // user ID
    pub username: String, // user name
    pub email: String,
    pub iat: usize,       // issued at (unix timestamp)
    pub exp: usize,       // expires at (unix timestamp)
}
