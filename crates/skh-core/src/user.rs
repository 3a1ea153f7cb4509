//! Users: the officers and operators referenced by documents.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Surrogate key of a user row.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Access level. Only `SuperAdmin` may modify documents issued by others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
  SuperAdmin,
  #[default]
  Operator,
}

impl Role {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::SuperAdmin => "SUPER_ADMIN",
      Self::Operator => "OPERATOR",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "SUPER_ADMIN" => Some(Self::SuperAdmin),
      "OPERATOR" => Some(Self::Operator),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub user_id:             UserId,
  pub full_name:           String,
  /// Staff registration number; unique per user.
  pub registration_number: String,
  pub rank:                Option<String>,
  pub position:            Option<String>,
  pub role:                Role,
  pub created_at:          DateTime<Utc>,
}

impl User {
  /// Whether this user may modify or read the document issued by `operator`.
  pub fn may_manage(&self, operator: UserId) -> bool {
    self.role == Role::SuperAdmin || self.user_id == operator
  }
}

/// Input to [`crate::store::LedgerStore::add_user`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
  pub full_name:           String,
  pub registration_number: String,
  pub rank:                Option<String>,
  pub position:            Option<String>,
  pub role:                Role,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn user(id: i64, role: Role) -> User {
    User {
      user_id: UserId(id),
      full_name: "Test".into(),
      registration_number: format!("NRP{id}"),
      rank: None,
      position: None,
      role,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn operator_manages_only_own_documents() {
    let op = user(7, Role::Operator);
    assert!(op.may_manage(UserId(7)));
    assert!(!op.may_manage(UserId(8)));
  }

  #[test]
  fn super_admin_manages_everything() {
    let admin = user(1, Role::SuperAdmin);
    assert!(admin.may_manage(UserId(42)));
  }

  #[test]
  fn role_labels_roundtrip() {
    for role in [Role::SuperAdmin, Role::Operator] {
      assert_eq!(Role::parse(role.as_str()), Some(role));
    }
    assert_eq!(Role::parse("GUEST"), None);
  }
}
