use std::time::Duration;

use log::{error, info};
use mongodb::bson::DateTime;
use rocket::fairing::AdHoc;

use crate::config::Config;
use crate::ledger::Ledger;
use crate::services::subscriptions::SubscriptionService;

/// Periodically moves past-due active subscriptions to `expired`.
pub fn sweeper() -> AdHoc {
    AdHoc::on_liftoff("Subscription expiry sweeper", |rocket| {
        Box::pin(async move {
            let Some(ledger) = rocket.state::<Ledger>().cloned() else {
                error!("Ledger not managed, expiry sweeper not started");
                return;
            };
            let period = Duration::from_secs(Config::expiry_sweep_secs().max(1));

            rocket::tokio::spawn(async move {
                let mut interval = rocket::tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    match SubscriptionService::expire_due(&*ledger, DateTime::now()).await {
                        Ok(0) => {}
                        Ok(count) => info!("Expired {} subscriptions", count),
                        Err(e) => error!("Expiry sweep failed: {}", e),
                    }
                }
            });
            info!("Expiry sweeper running every {:?}", period);
        })
    })
}
