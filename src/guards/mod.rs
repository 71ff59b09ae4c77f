pub mod actor;
pub mod auth;
pub mod signature;

pub use actor::ActorGuard;
pub use auth::AuthGuard;
pub use signature::StripeSignature;
