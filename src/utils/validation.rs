use mongodb::bson::oid::ObjectId;
use regex::Regex;

use crate::utils::ApiError;

fn matches(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).map(|re| re.is_match(value)).unwrap_or(false)
}

pub fn validate_email(email: &str) -> bool {
    matches(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$", email)
}

/// At least one letter and one digit.
pub fn validate_password(password: &str) -> bool {
    password.len() >= 8 && matches(r"[A-Za-z]", password) && matches(r"\d", password)
}

/// Expects an already upper-cased code.
pub fn validate_coupon_code(code: &str) -> bool {
    matches(r"^[A-Z0-9_-]{4,32}$", code)
}

pub fn parse_object_id(id: &str, what: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(id).map_err(|_| ApiError::bad_request(format!("Invalid {} id", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails() {
        assert!(validate_email("buyer@example.com"));
        assert!(!validate_email("buyer@example"));
        assert!(!validate_email("not an email"));
    }

    #[test]
    fn passwords_need_letters_and_digits() {
        assert!(validate_password("hunter22x"));
        assert!(!validate_password("short1"));
        assert!(!validate_password("lettersonly"));
        assert!(!validate_password("1234567890"));
    }

    #[test]
    fn coupon_codes() {
        assert!(validate_coupon_code("WELCOME10"));
        assert!(validate_coupon_code("SPRING-24"));
        assert!(!validate_coupon_code("abc"));
        assert!(!validate_coupon_code("has space"));
    }
}
