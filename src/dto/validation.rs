//! Validation helpers for DTOs.

use validator::ValidationError;

/// Rejects chat messages made only of whitespace.
///
/// # Examples
///
/// ```ignore
/// validate_message_content("on my way") // Ok
/// validate_message_content("   ")       // Err - blank
/// ```
pub fn validate_message_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        let mut err = ValidationError::new("message_blank");
        err.message = Some("Message must contain visible characters".into());
        return Err(err);
    }

    if content.chars().any(|c| c.is_control() && c != '\n') {
        let mut err = ValidationError::new("message_control_chars");
        err.message = Some("Message must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}
