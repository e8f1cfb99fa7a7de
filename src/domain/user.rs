use {
    super::id::UserId,
    chrono::{DateTime, Utc},
    serde::Serialize,
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    /// Auto-provisioned from a payment; the owner has never set a password.
    pub needs_password_setup: bool,
    /// Permanent entitlement bypass.
    pub is_founder: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub needs_password_setup: bool,
}

impl NewUser {
    /// Placeholder account for an email seen for the first time on a payment.
    pub fn placeholder(email: &str, name: Option<String>) -> Self {
        Self {
            id: UserId::new(),
            email: normalize_email(email),
            name,
            needs_password_setup: true,
        }
    }

    pub fn into_user(self, now: DateTime<Utc>) -> User {
        User {
            id: self.id,
            email: self.email,
            name: self.name,
            needs_password_setup: self.needs_password_setup,
            is_founder: false,
            created_at: now,
        }
    }
}

/// Result of resolve-or-create by email.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub user: User,
    pub created: bool,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
