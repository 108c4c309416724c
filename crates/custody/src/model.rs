//! Custody records: actors, assets and their state.
//!
//! The borrower lives inside [`Custody::CheckedOut`], so an asset can never
//! be available with a borrower, or out without one.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use keyward_storage::{AssetId, UserId};
use keyward_token::Location;
use serde::{Deserialize, Serialize};

use crate::error::{CustodyError, Result};

/// Role of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Manages assets and location codes.
    Admin,
    /// Security staff.
    Security,
    /// Other staff.
    Staff,
    /// Students; the default role for self-registered users.
    Student,
}

impl Role {
    /// Canonical spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Security => "Security",
            Self::Staff => "Staff",
            Self::Student => "Student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CustodyError;

    /// Parses a role name case-insensitively. Unknown names are rejected.
    fn from_str(s: &str) -> Result<Self> {
        [Self::Admin, Self::Security, Self::Staff, Self::Student]
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CustodyError::invalid_request(format!("unknown role: {s:?}")))
    }
}

/// An authenticated user acting on an asset.
///
/// Identity comes from the authentication layer; this type only checks that
/// it is well formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    user_id: UserId,
    display_name: String,
    role: Role,
}

impl Actor {
    /// Creates an actor, trimming the display name.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::InvalidRequest`] for a blank display name.
    pub fn new(user_id: UserId, display_name: &str, role: Role) -> Result<Self> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(CustodyError::invalid_request("display name cannot be blank"));
        }
        Ok(Self { user_id, display_name: display_name.to_owned(), role })
    }

    /// Creates an actor from the raw fields of an authenticated session.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::InvalidRequest`] for a blank display name or
    /// an unknown role.
    pub fn from_session(user_id: i64, display_name: &str, role: &str) -> Result<Self> {
        Self::new(UserId(user_id), display_name, role.parse()?)
    }

    /// The user's id.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The user's display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The user's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the actor may perform administrative operations.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Whether an asset can be checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetStatus {
    /// On its hook at the home location.
    Available,
    /// Held by a borrower.
    CheckedOut,
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => f.write_str("Available"),
            Self::CheckedOut => f.write_str("CheckedOut"),
        }
    }
}

/// Custody state of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Custody {
    /// Nobody holds the asset.
    Available,
    /// `borrower` holds the asset.
    CheckedOut {
        /// Who checked it out.
        borrower: Actor,
    },
}

/// A custody transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CustodyAction {
    /// `Available` to `CheckedOut`.
    CheckOut,
    /// `CheckedOut` to `Available`.
    CheckIn,
}

impl CustodyAction {
    /// Snake-case name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckOut => "check_out",
            Self::CheckIn => "check_in",
        }
    }
}

impl fmt::Display for CustodyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical key tracked by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Stable identity.
    pub id: AssetId,
    /// Human label.
    pub name: String,
    /// Where the asset lives and must be checked out from.
    pub home_location: Location,
    /// Current custody state.
    pub custody: Custody,
    /// Time of the last checkout.
    pub checked_out_at: Option<DateTime<Utc>>,
    /// Time of the last check-in.
    pub checked_in_at: Option<DateTime<Utc>>,
    /// Number of custody transitions so far.
    pub revision: u64,
    /// When the asset was registered.
    pub created_at: DateTime<Utc>,
}

impl Asset {
    /// A newly registered, available asset.
    #[must_use]
    pub fn new(id: AssetId, name: String, home_location: Location, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            home_location,
            custody: Custody::Available,
            checked_out_at: None,
            checked_in_at: None,
            revision: 0,
            created_at: now,
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> AssetStatus {
        match self.custody {
            Custody::Available => AssetStatus::Available,
            Custody::CheckedOut { .. } => AssetStatus::CheckedOut,
        }
    }

    /// The current borrower, if checked out.
    #[must_use]
    pub fn borrower(&self) -> Option<&Actor> {
        match &self.custody {
            Custody::Available => None,
            Custody::CheckedOut { borrower } => Some(borrower),
        }
    }

    /// Returns the asset as it is after `action` by `actor` at `now`.
    ///
    /// The location binding is checked by the caller; this only enforces
    /// the status precondition.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::AlreadyCheckedOut`] when checking out an asset that is out
    /// - [`CustodyError::NotCheckedOut`] when checking in an asset that is not
    pub fn transition(&self, action: CustodyAction, actor: &Actor, now: DateTime<Utc>) -> Result<Self> {
        let mut next = self.clone();
        match (action, &self.custody) {
            (CustodyAction::CheckOut, Custody::Available) => {
                next.custody = Custody::CheckedOut { borrower: actor.clone() };
                next.checked_out_at = Some(now);
            },
            (CustodyAction::CheckOut, Custody::CheckedOut { .. }) => {
                return Err(CustodyError::AlreadyCheckedOut { id: self.id });
            },
            (CustodyAction::CheckIn, Custody::CheckedOut { .. }) => {
                next.custody = Custody::Available;
                next.checked_in_at = Some(now);
            },
            (CustodyAction::CheckIn, Custody::Available) => {
                return Err(CustodyError::NotCheckedOut { id: self.id });
            },
        }
        next.revision += 1;
        Ok(next)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use keyward_token::LocationSet;
    use rstest::rstest;

    use super::*;
    use crate::error::ErrorKind;

    fn asset() -> Asset {
        let home = LocationSet::default().resolve("Block A").unwrap();
        Asset::new(AssetId(7), "Lab 3 master".into(), home, Utc::now())
    }

    fn actor() -> Actor {
        Actor::new(UserId(42), "Ada", Role::Student).unwrap()
    }

    #[rstest]
    #[case("Admin", Role::Admin)]
    #[case("admin", Role::Admin)]
    #[case("SECURITY", Role::Security)]
    #[case("Staff", Role::Staff)]
    #[case("student", Role::Student)]
    fn test_role_parse(#[case] input: &str, #[case] expected: Role) {
        assert_eq!(input.parse::<Role>().unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("Janitor")]
    #[case("Admins")]
    fn test_role_parse_rejects_unknown(#[case] input: &str) {
        assert_eq!(input.parse::<Role>().unwrap_err().kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_actor_validation() {
        assert_eq!(Actor::new(UserId(1), "  Grace  ", Role::Staff).unwrap().display_name(), "Grace");
        assert!(Actor::new(UserId(1), "   ", Role::Staff).is_err());
        assert!(Actor::from_session(1, "Grace", "Wizard").is_err());
        assert!(Actor::from_session(1, "Grace", "admin").unwrap().is_admin());
    }

    #[test]
    fn test_checkout_then_checkin() {
        let now = Utc::now();
        let out = asset().transition(CustodyAction::CheckOut, &actor(), now).unwrap();
        assert_eq!(out.status(), AssetStatus::CheckedOut);
        assert_eq!(out.borrower(), Some(&actor()));
        assert_eq!(out.checked_out_at, Some(now));
        assert_eq!(out.revision, 1);

        let back = out.transition(CustodyAction::CheckIn, &actor(), now).unwrap();
        assert_eq!(back.status(), AssetStatus::Available);
        assert_eq!(back.borrower(), None);
        assert_eq!(back.checked_in_at, Some(now));
        assert_eq!(back.checked_out_at, Some(now));
        assert_eq!(back.revision, 2);
    }

    #[test]
    fn test_status_preconditions() {
        let now = Utc::now();
        let err = asset().transition(CustodyAction::CheckIn, &actor(), now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotCheckedOut);

        let out = asset().transition(CustodyAction::CheckOut, &actor(), now).unwrap();
        let err = out.transition(CustodyAction::CheckOut, &actor(), now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyCheckedOut);
    }

    #[test]
    fn test_record_encoding() {
        let out = asset().transition(CustodyAction::CheckOut, &actor(), Utc::now()).unwrap();
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["home_location"], "Block A");
        assert_eq!(json["custody"]["status"], "CheckedOut");
        assert_eq!(json["custody"]["borrower"]["display_name"], "Ada");

        let decoded: Asset = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, out);
    }

    #[test]
    fn test_unknown_status_rejected_at_decode() {
        let mut json = serde_json::to_value(asset()).unwrap();
        json["custody"]["status"] = "Lost".into();
        assert!(serde_json::from_value::<Asset>(json).is_err());
    }
}
