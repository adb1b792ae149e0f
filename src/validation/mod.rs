use std::fmt;

pub const MAX_CART_LINES: usize = 20;
pub const MAX_UNITS_PER_LINE: i64 = 100;
pub const REASON_MAX_LEN: usize = 500;
pub const SECRET_MAX_LEN: usize = 4096;
pub const PAYMENT_REF_MAX_LEN: usize = 255;
pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 128;
pub const NOTE_MAX_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| word.chars().filter(|ch| !ch.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.chars().count() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_cart_size(lines: usize) -> ValidationResult {
    if lines == 0 {
        return Err(ValidationError::new("items", "cart must not be empty"));
    }
    if lines > MAX_CART_LINES {
        return Err(ValidationError::new(
            "items",
            format!("at most {} products per order", MAX_CART_LINES),
        ));
    }

    Ok(())
}

pub fn validate_quantity(quantity: i64) -> ValidationResult {
    if quantity < 1 {
        return Err(ValidationError::new("quantity", "must be at least 1"));
    }
    if quantity > MAX_UNITS_PER_LINE {
        return Err(ValidationError::new(
            "quantity",
            format!("must be at most {}", MAX_UNITS_PER_LINE),
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: i64) -> ValidationResult {
    if amount <= 0 {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

/// Cancellation reasons are free text; returns the cleaned value.
pub fn validate_reason(reason: &str) -> Result<String, ValidationError> {
    let reason = sanitize_string(reason);
    validate_required("reason", &reason)?;
    validate_max_len("reason", &reason, REASON_MAX_LEN)?;
    Ok(reason)
}

/// Secrets keep their inner whitespace; only the ends are trimmed.
pub fn validate_secret_value(secret: &str) -> Result<String, ValidationError> {
    let secret = secret.trim();
    validate_required("secret_value", secret)?;
    validate_max_len("secret_value", secret, SECRET_MAX_LEN)?;
    if secret.chars().any(|ch| ch.is_control() && ch != '\n') {
        return Err(ValidationError::new(
            "secret_value",
            "must not contain control characters",
        ));
    }
    Ok(secret.to_string())
}

pub fn validate_reference(field: &'static str, value: &str, max_len: usize) -> Result<String, ValidationError> {
    let value = sanitize_string(value);
    validate_required(field, &value)?;
    validate_max_len(field, &value, max_len)?;
    if !value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':'))
    {
        return Err(ValidationError::new(
            field,
            "must contain only letters, digits, '-', '_', '.' or ':'",
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn validates_max_len() {
        assert!(validate_max_len("field", "abc", 3).is_ok());
        assert!(validate_max_len("field", "abcd", 3).is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string("single"), "single");
        assert_eq!(sanitize_string(" \n "), "");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
        assert_eq!(sanitize_string("wrong\nregion"), "wrong region");
        assert_eq!(sanitize_string("a \u{0007} b"), "a b");
    }

    #[test]
    fn validates_cart_size() {
        assert!(validate_cart_size(0).is_err());
        assert!(validate_cart_size(1).is_ok());
        assert!(validate_cart_size(MAX_CART_LINES + 1).is_err());
    }

    #[test]
    fn validates_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-3).is_err());
        assert!(validate_quantity(MAX_UNITS_PER_LINE + 1).is_err());
    }

    #[test]
    fn validates_positive_amount() {
        assert!(validate_positive_amount(1).is_ok());
        assert!(validate_positive_amount(0).is_err());
        assert!(validate_positive_amount(-1).is_err());
    }

    #[test]
    fn cleans_reason() {
        assert_eq!(validate_reason("  out of\tstock ").unwrap(), "out of stock");
        assert!(validate_reason(" ").is_err());
        assert!(validate_reason(&"x".repeat(REASON_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn keeps_secret_body() {
        assert_eq!(
            validate_secret_value("  login: a\npass: b  ").unwrap(),
            "login: a\npass: b"
        );
        assert!(validate_secret_value("").is_err());
        assert!(validate_secret_value("a\u{0007}b").is_err());
    }

    #[test]
    fn validates_reference() {
        assert_eq!(
            validate_reference("payment_ref", " MOMO-123_4 ", 20).unwrap(),
            "MOMO-123_4"
        );
        assert!(validate_reference("payment_ref", "a b", 20).is_err());
        assert!(validate_reference("payment_ref", "", 20).is_err());
    }
}
