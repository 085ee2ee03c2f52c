use serde::{Serialize, Deserialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

/// A persisted chat message. `id` and `created_at` are assigned by the store
/// at insert time; rows are never updated or deleted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: i64,
    pub from_user: i64,
    pub to_user: i64,
    pub content: String,
    pub created_at: String,
}
