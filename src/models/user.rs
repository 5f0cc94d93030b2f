use serde::{Deserialize, Serialize};

/// Tenant account. Owned by the wider platform; this service only reads it
/// and moves the current-plan pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub current_plan_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
}
