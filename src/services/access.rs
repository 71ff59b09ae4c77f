//! Role → capability mapping. Every privileged operation asks `require`
//! instead of comparing role strings.

use std::collections::HashSet;

use crate::ledger::LedgerError;
use crate::models::{Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ManageLeads,
    ManageUsers,
    ManageSubscriptions,
    ManageCoupons,
    ManageTickets,
    ManageCoins,
    ManageSettings,
    ViewDashboard,
    UnlockLeadsFree,
}

impl Capability {
    /// Capabilities a subadmin can be granted through `permissions`.
    pub const GRANTABLE: [Capability; 7] = [
        Capability::ManageLeads,
        Capability::ManageUsers,
        Capability::ManageSubscriptions,
        Capability::ManageCoupons,
        Capability::ManageTickets,
        Capability::ManageCoins,
        Capability::ManageSettings,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Capability::ManageLeads => "manage_leads",
            Capability::ManageUsers => "manage_users",
            Capability::ManageSubscriptions => "manage_subscriptions",
            Capability::ManageCoupons => "manage_coupons",
            Capability::ManageTickets => "manage_tickets",
            Capability::ManageCoins => "manage_coins",
            Capability::ManageSettings => "manage_settings",
            Capability::ViewDashboard => "view_dashboard",
            Capability::UnlockLeadsFree => "unlock_leads_free",
        }
    }

    pub fn from_permission(key: &str) -> Option<Capability> {
        Self::GRANTABLE.into_iter().find(|c| c.key() == key)
    }
}

pub fn capabilities(user: &User) -> HashSet<Capability> {
    match user.role {
        Role::Admin => Capability::GRANTABLE
            .into_iter()
            .chain([Capability::ViewDashboard, Capability::UnlockLeadsFree])
            .collect(),
        Role::Subadmin => user
            .permissions
            .iter()
            .filter_map(|p| Capability::from_permission(p))
            .chain([Capability::ViewDashboard, Capability::UnlockLeadsFree])
            .collect(),
        Role::User => HashSet::new(),
    }
}

pub fn has(user: &User, capability: Capability) -> bool {
    capabilities(user).contains(&capability)
}

pub fn require(user: &User, capability: Capability) -> Result<(), LedgerError> {
    if has(user, capability) {
        Ok(())
    } else {
        Err(LedgerError::Forbidden(format!("missing permission '{}'", capability.key())))
    }
}

/// Rejects permission keys nobody can hold.
pub fn validate_permissions(permissions: &[String]) -> Result<(), LedgerError> {
    match permissions.iter().find(|p| Capability::from_permission(p).is_none()) {
        Some(unknown) => Err(LedgerError::Validation(format!("unknown permission '{}'", unknown))),
        None => Ok(()),
    }
}
