use rocket::request::{self, Request, FromRequest, Outcome};
use rocket::http::Status;
use rocket::State;
use log::warn;
use mongodb::bson::oid::ObjectId;
use rocket_okapi::request::OpenApiFromRequest;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::RequestHeaderInput;

use crate::guards::AuthGuard;
use crate::ledger::Ledger;
use crate::models::{User, UserStatus};

/// An authenticated caller loaded fresh from the store, so role, permission
/// and status changes apply to tokens issued before them.
pub struct ActorGuard {
    pub id: ObjectId,
    pub user: User,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ActorGuard {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let auth = match req.guard::<AuthGuard>().await {
            Outcome::Success(auth) => auth,
            Outcome::Error(e) => return Outcome::Error(e),
            Outcome::Forward(f) => return Outcome::Forward(f),
        };

        let ledger = match req.guard::<&State<Ledger>>().await {
            Outcome::Success(ledger) => ledger,
            _ => return Outcome::Error((Status::InternalServerError, ())),
        };

        match ledger.user(&auth.user_id).await {
            Ok(Some(user)) if user.status == UserStatus::Inactive => {
                warn!("Actor guard rejected {}: account inactive", auth.user_id);
                Outcome::Error((Status::Forbidden, ()))
            }
            Ok(Some(user)) => Outcome::Success(ActorGuard { id: auth.user_id, user }),
            Ok(None) => Outcome::Error((Status::Unauthorized, ())),
            Err(e) => {
                warn!("Actor guard lookup failed: {}", e);
                Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for ActorGuard {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}
