use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ordered approval authority level. Ordering is significant: tier
/// sufficiency checks are plain `>=` comparisons, never string matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Manager,
    Admin,
}

impl Tier {
    /// The next tier up, or `None` when already at the ceiling.
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Manager => Some(Tier::Admin),
            Tier::Admin => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Manager => "manager",
            Tier::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Result<Tier, RoleParseError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "manager" => Ok(Tier::Manager),
            "admin" => Ok(Tier::Admin),
            other => Err(RoleParseError::UnknownTier(other.to_string())),
        }
    }
}

/// Organizational role of a user. SalesRep can request approvals but never
/// decide them; Manager and Admin map onto the corresponding tiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SalesRep,
    Manager,
    Admin,
}

impl Role {
    /// Decision authority carried by this role, if any.
    pub fn tier(self) -> Option<Tier> {
        match self {
            Role::SalesRep => None,
            Role::Manager => Some(Tier::Manager),
            Role::Admin => Some(Tier::Admin),
        }
    }

    /// Roles allowed to open an approval request.
    pub fn may_request(self) -> bool {
        matches!(self, Role::SalesRep | Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SalesRep => "sales_rep",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Result<Role, RoleParseError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sales_rep" => Ok(Role::SalesRep),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(RoleParseError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoleParseError {
    #[error("unknown role `{0}` (expected sales_rep|manager|admin)")]
    UnknownRole(String),
    #[error("unknown tier `{0}` (expected manager|admin)")]
    UnknownTier(String),
}

#[cfg(test)]
mod tests {
    use super::{Role, Tier};

    #[test]
    fn tiers_are_ordered_manager_below_admin() {
        assert!(Tier::Manager < Tier::Admin);
        assert!(Tier::Admin >= Tier::Manager);
    }

    #[test]
    fn admin_is_the_escalation_ceiling() {
        assert_eq!(Tier::Manager.next(), Some(Tier::Admin));
        assert_eq!(Tier::Admin.next(), None);
    }

    #[test]
    fn sales_rep_holds_no_decision_tier() {
        assert_eq!(Role::SalesRep.tier(), None);
        assert_eq!(Role::Manager.tier(), Some(Tier::Manager));
        assert_eq!(Role::Admin.tier(), Some(Tier::Admin));
    }

    #[test]
    fn only_sales_rep_and_admin_may_request() {
        assert!(Role::SalesRep.may_request());
        assert!(!Role::Manager.may_request());
        assert!(Role::Admin.may_request());
    }

    #[test]
    fn role_and_tier_round_trip_through_strings() {
        for role in [Role::SalesRep, Role::Manager, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Ok(role));
        }
        for tier in [Tier::Manager, Tier::Admin] {
            assert_eq!(Tier::parse(tier.as_str()), Ok(tier));
        }
        assert!(Role::parse("intern").is_err());
    }
}
