pub mod admin;
pub mod auth;
pub mod coupon;
pub mod dashboard;
pub mod lead;
pub mod subscription;
pub mod ticket;
pub mod user;
pub mod webhook;
