use rocket::request::{self, FromRequest, Outcome, Request};

/// The raw `Stripe-Signature` header, if any. Checking it is the
/// webhook handler's job.
pub struct StripeSignature(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for StripeSignature {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        Outcome::Success(StripeSignature(
            req.headers().get_one("Stripe-Signature").map(str::to_string),
        ))
    }
}
