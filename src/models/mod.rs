pub mod user;
pub mod subscription;
pub mod lead;
pub mod ledger;
pub mod coupon;
pub mod ticket;

pub use user::*;
pub use subscription::*;
pub use lead::*;
pub use ledger::*;
pub use coupon::*;
pub use ticket::*;
