pub mod response;
pub mod validation;

pub use response::{ApiError, ApiResponse};
pub use validation::{parse_object_id, validate_coupon_code, validate_email, validate_password};
