use std::sync::Arc;

use log::{error, info};
use mongodb::{Client, Database};
use rocket::fairing::AdHoc;

use crate::ledger::{Ledger, MongoLedger};

pub const USERS: &str = "users";
pub const SUBSCRIPTION_PLANS: &str = "subscription_plans";
pub const USER_SUBSCRIPTIONS: &str = "user_subscriptions";
pub const LEADS: &str = "leads";
pub const LEAD_VIEWS: &str = "lead_views";
pub const LEAD_COIN_SETTINGS: &str = "lead_coin_settings";
pub const COUPONS: &str = "coupons";
pub const COUPON_REDEMPTIONS: &str = "coupon_redemptions";
pub const COIN_TRANSACTIONS: &str = "coin_transactions";
pub const COIN_ORDERS: &str = "coin_orders";
pub const RECONCILIATION_QUEUE: &str = "reconciliation_queue";
pub const SUPPORT_TICKETS: &str = "support_tickets";
pub const RATE_LIMITS: &str = "rate_limits";

/// Connects, builds indexes, and manages both the raw database handle and
/// the ledger. Launch is aborted when any step fails.
pub fn init() -> AdHoc {
    AdHoc::try_on_ignite("MongoDB", |rocket| async {
        let (client, database) = match connect().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("✗ Failed to connect to MongoDB: {}", e);
                return Err(rocket);
            }
        };
        info!("✓ MongoDB connected successfully");

        let ledger = MongoLedger::new(client, database.clone());
        if let Err(e) = ledger.ensure_indexes().await {
            error!("✗ Failed to create indexes: {}", e);
            return Err(rocket);
        }

        let ledger: Ledger = Arc::new(ledger);
        Ok(rocket.manage(database).manage(ledger))
    })
}

async fn connect() -> Result<(Client, Database), mongodb::error::Error> {
    let uri = crate::config::Config::mongodb_uri();
    let client = Client::with_uri_str(&uri).await?;

    // Test connection
    client
        .database("admin")
        .run_command(mongodb::bson::doc! {"ping": 1}, None)
        .await?;

    let database = client.database(&crate::config::Config::mongodb_database());
    Ok((client, database))
}

pub type DbConn = Database;
