pub mod access;
pub mod balance;
pub mod coupons;
pub mod email;
pub mod expiry;
pub mod jwt;
pub mod lead_gate;
pub mod stripe;
pub mod subscriptions;
pub mod webhook;

pub use balance::BalanceService;
pub use coupons::CouponService;
pub use email::EmailService;
pub use jwt::JwtService;
pub use lead_gate::LeadGate;
pub use stripe::StripeService;
pub use subscriptions::SubscriptionService;
pub use webhook::{WebhookConfig, WebhookService};
