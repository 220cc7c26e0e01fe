use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of marketplace identity a credential was issued for.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Customer,
    User,
    Seller,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Customer => "customer",
            UserType::User => "user",
            UserType::Seller => "seller",
        }
    }
}

impl From<UserType> for String {
    fn from(user_type: UserType) -> Self {
        user_type.as_str().to_string()
    }
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(UserType::Customer),
            "user" => Ok(UserType::User),
            "seller" => Ok(UserType::Seller),
            other => Err(format!("unknown user type '{}'", other)),
        }
    }
}

/// Login identity checked by the password-based identity provider.
#[allow(non_snake_case)]
#[derive(Debug, Deserialize, sqlx::FromRow, Clone)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub user_type: String,
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_type_round_trips_through_strings() {
        for user_type in [UserType::Customer, UserType::User, UserType::Seller] {
            let parsed: UserType = user_type.as_str().parse().unwrap();
            assert_eq!(parsed, user_type);
        }
        assert!("admin".parse::<UserType>().is_err());
    }
}
