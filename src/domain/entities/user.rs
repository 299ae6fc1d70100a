use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::ValidationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: &str) -> Result<Self, ValidationError> {
        if username.trim().is_empty() {
            return Err(ValidationError::InvalidUsername(
                "username is empty".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(User {
            id: 0,
            username: username.to_string(),
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_new() {
        let user = User::new("satoshi").unwrap();
        assert_eq!(user.username, "satoshi");
        assert_eq!(user.id, 0);
    }

    #[test]
    fn test_user_new_rejects_empty() {
        assert!(User::new("  ").is_err());
    }
}
