use log::info;
use mongodb::bson::oid::ObjectId;

use crate::ledger::{LedgerError, LedgerStore, Unlock};
use crate::models::{LeadAccessResponse, LeadContact, User};
use crate::services::access::{self, Capability};

pub struct LeadGate;

impl LeadGate {
    /// Charges `contact_info_cost` on a user's first view of a lead and
    /// returns the contact details. Repeat views and staff views are free.
    pub async fn request_contact_info(
        ledger: &dyn LedgerStore,
        user: &User,
        lead_id: &ObjectId,
    ) -> Result<LeadAccessResponse, LedgerError> {
        let user_id = user.id.ok_or(LedgerError::UserNotFound)?;
        let lead = ledger.lead(lead_id).await?.ok_or(LedgerError::LeadNotFound)?;

        let cost = if access::has(user, Capability::UnlockLeadsFree) {
            0
        } else {
            ledger.settings().await?.contact_info_cost.max(0)
        };

        let unlock = ledger
            .unlock_lead(&user_id, lead_id, cost)
            .await
            .map_err(|e| match e {
                LedgerError::InsufficientFunds { balance, requested } => {
                    LedgerError::InsufficientCoins { balance, cost: requested }
                }
                other => other,
            })?;

        let (coins_spent, remaining_coins) = match unlock {
            Unlock::Unlocked { coins_spent, balance } => {
                info!("User {} unlocked lead {} for {} LeadCoins", user_id, lead_id, coins_spent);
                (coins_spent, balance)
            }
            Unlock::AlreadyUnlocked { balance } => (0, balance),
        };

        Ok(LeadAccessResponse {
            granted: true,
            coins_spent,
            remaining_coins,
            contact: Some(LeadContact::from(&lead)),
        })
    }

    /// Whether `user` may see contact fields without paying again.
    pub async fn is_unlocked(ledger: &dyn LedgerStore, user: &User, lead_id: &ObjectId) -> Result<bool, LedgerError> {
        if access::has(user, Capability::UnlockLeadsFree) {
            return Ok(true);
        }
        let user_id = user.id.ok_or(LedgerError::UserNotFound)?;
        Ok(ledger.lead_view(&user_id, lead_id).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use crate::models::{LeadCoinSettings, Role};

    fn settings(contact_info_cost: i64) -> LeadCoinSettings {
        LeadCoinSettings {
            contact_info_cost,
            ..LeadCoinSettings::default()
        }
    }

    async fn load(ledger: &MemoryLedger, id: &ObjectId) -> User {
        ledger.user(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn first_view_charges_and_repeat_is_free() {
        let ledger = MemoryLedger::new();
        ledger.set_settings(settings(5));
        let user_id = ledger.add_user(Role::User, 5);
        let admin = ledger.add_user(Role::Admin, 0);
        let lead = ledger.add_lead(admin);
        let user = load(&ledger, &user_id).await;

        let first = LeadGate::request_contact_info(&ledger, &user, &lead).await.unwrap();
        assert!(first.granted);
        assert_eq!(first.coins_spent, 5);
        assert_eq!(first.remaining_coins, 0);
        assert_eq!(first.contact.unwrap().email.as_deref(), Some("owner@example.com"));

        let again = LeadGate::request_contact_info(&ledger, &user, &lead).await.unwrap();
        assert!(again.granted);
        assert_eq!(again.coins_spent, 0);
        assert_eq!(again.remaining_coins, 0);
        assert_eq!(ledger.journal(&user_id).len(), 1);
        assert!(LeadGate::is_unlocked(&ledger, &user, &lead).await.unwrap());
    }

    #[tokio::test]
    async fn short_balance_is_refused_without_recording_a_view() {
        let ledger = MemoryLedger::new();
        ledger.set_settings(settings(5));
        let user_id = ledger.add_user(Role::User, 4);
        let admin = ledger.add_user(Role::Admin, 0);
        let lead = ledger.add_lead(admin);
        let user = load(&ledger, &user_id).await;

        let err = LeadGate::request_contact_info(&ledger, &user, &lead).await.unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientCoins { balance: 4, cost: 5 }));
        assert_eq!(ledger.balance(&user_id).await.unwrap(), 4);
        assert!(ledger.lead_view(&user_id, &lead).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn staff_views_are_free_but_recorded() {
        let ledger = MemoryLedger::new();
        let admin_id = ledger.add_user(Role::Admin, 0);
        let sub_id = ledger.add_user(Role::Subadmin, 0);
        let lead = ledger.add_lead(admin_id);

        for id in [admin_id, sub_id] {
            let staff = load(&ledger, &id).await;
            let access = LeadGate::request_contact_info(&ledger, &staff, &lead).await.unwrap();
            assert!(access.granted);
            assert_eq!(access.coins_spent, 0);
            assert!(access.contact.is_some());
            assert!(ledger.lead_view(&id, &lead).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn unknown_lead_is_not_found() {
        let ledger = MemoryLedger::new();
        let user_id = ledger.add_user(Role::User, 10);
        let user = load(&ledger, &user_id).await;

        let err = LeadGate::request_contact_info(&ledger, &user, &ObjectId::new()).await.unwrap_err();
        assert!(matches!(err, LedgerError::LeadNotFound));
        assert_eq!(ledger.balance(&user_id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn concurrent_first_views_charge_once() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_settings(settings(1));
        let user_id = ledger.add_user(Role::User, 10);
        let admin = ledger.add_user(Role::Admin, 0);
        let lead = ledger.add_lead(admin);
        let user = load(&ledger, &user_id).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let user = user.clone();
                tokio::spawn(async move { LeadGate::request_contact_info(&*ledger, &user, &lead).await })
            })
            .collect();

        let mut spent = 0;
        for handle in handles {
            spent += handle.await.unwrap().unwrap().coins_spent;
        }

        assert_eq!(spent, 1);
        assert_eq!(ledger.balance(&user_id).await.unwrap(), 9);
    }
}
