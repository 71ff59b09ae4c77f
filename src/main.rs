#[macro_use]
extern crate rocket;

mod config;
mod db;
mod guards;
mod ledger;
mod models;
mod routes;
mod services;
mod utils;

use dotenvy::dotenv;
use log::info;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::{Build, Request, Response, Rocket};
use rocket_okapi::openapi_get_routes;
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};

use crate::services::WebhookConfig;

/* ----------------------------- CORS ----------------------------- */

pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        if let Some(origin) = request.headers().get_one("Origin") {
            response.set_header(Header::new("Access-Control-Allow-Origin", origin));
        }

        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, DELETE, OPTIONS",
        ));

        response.set_header(Header::new(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization, Stripe-Signature",
        ));

        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

/* ----------------------------- OPTIONS ----------------------------- */

#[options("/<_..>")]
fn options_handler() {}

/* ----------------------------- ERRORS ----------------------------- */

#[catch(401)]
fn unauthorized() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Missing or invalid access token"
    })
}

#[catch(403)]
fn forbidden() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Account is not allowed to perform this action"
    })
}

#[catch(404)]
fn not_found() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Resource not found (check /api/v1 prefix)"
    })
}

#[catch(422)]
fn unprocessable() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Request body could not be parsed"
    })
}

#[catch(500)]
fn internal_error() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Internal server error"
    })
}

/* ----------------------------- SWAGGER ----------------------------- */

fn swagger_config() -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: "../v1/openapi.json".to_string(),
        ..Default::default()
    }
}

/* ----------------------------- LAUNCH ----------------------------- */

#[launch]
fn rocket() -> Rocket<Build> {
    dotenv().ok();
    env_logger::init();

    if !config::Config::is_stripe_enabled() {
        info!("Stripe secret key not set; checkout endpoints will fail");
    }
    info!("🚀 LeadCoin API running");
    info!("📚 Swagger UI → http://localhost:8000/api/docs");

    rocket::build()
        .attach(db::init())
        .attach(services::expiry::sweeper())
        .attach(CORS)
        .manage(WebhookConfig::from_config())
        .mount("/", routes![options_handler])
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Auth
                routes::auth::register,
                routes::auth::verify_email,
                routes::auth::login,
                routes::auth::refresh_token,
                // User
                routes::user::get_profile,
                routes::user::update_profile,
                routes::user::get_balance,
                routes::user::get_transactions,
                // Leads
                routes::lead::create_lead,
                routes::lead::list_leads,
                routes::lead::get_lead,
                routes::lead::update_lead,
                routes::lead::delete_lead,
                routes::lead::view_lead,
                // Plans
                routes::subscription::list_active_plans,
                routes::subscription::list_all_plans,
                routes::subscription::create_plan,
                routes::subscription::update_plan,
                // Subscriptions and coin purchases
                routes::subscription::purchase_subscription,
                routes::subscription::buy_coins,
                routes::subscription::verify_checkout,
                routes::subscription::my_subscriptions,
                routes::subscription::cancel_subscription,
                // Payment provider callback
                routes::webhook::payment_webhook,
                // Coupons
                routes::coupon::create_coupon,
                routes::coupon::list_coupons,
                routes::coupon::update_coupon_status,
                routes::coupon::redeem_coupon,
                // Support
                routes::ticket::create_ticket,
                routes::ticket::list_tickets,
                routes::ticket::get_ticket,
                routes::ticket::reply_to_ticket,
                routes::ticket::update_ticket_status,
                // Dashboards
                routes::dashboard::user_dashboard,
                routes::dashboard::admin_dashboard,
                // Admin
                routes::admin::list_users,
                routes::admin::update_user_role,
                routes::admin::update_user_status,
                routes::admin::delete_user,
                routes::admin::grant_coins,
                routes::admin::get_settings,
                routes::admin::update_settings,
                routes::admin::list_reconciliation,
                routes::admin::resolve_reconciliation,
            ],
        )
        .mount("/api/docs", make_swagger_ui(&swagger_config()))
        .register(
            "/",
            catchers![unauthorized, forbidden, not_found, unprocessable, internal_error],
        )
}
