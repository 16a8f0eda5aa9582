//! Input validation for identifiers and task fields

use anyhow::{anyhow, Result};

/// Maximum lengths for security
pub const MAX_USER_ID_LENGTH: usize = 128;
pub const MAX_TITLE_LENGTH: usize = 200;
pub const MAX_DESCRIPTION_LENGTH: usize = 1000;
pub const MAX_TAGS: usize = 32;

/// Validate user_id
///
/// Also used for marker keys, so `:` and `/` are rejected.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(anyhow!("user_id cannot be empty"));
    }

    if user_id.len() > MAX_USER_ID_LENGTH {
        return Err(anyhow!(
            "user_id too long: {} chars (max: {})",
            user_id.len(),
            MAX_USER_ID_LENGTH
        ));
    }

    if !user_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '@' || c == '.')
    {
        return Err(anyhow!(
            "user_id contains invalid characters (allowed: alphanumeric, -, _, @, .)"
        ));
    }

    Ok(())
}

/// Validate task_id (UUID format)
pub fn validate_task_id(task_id: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(task_id).map_err(|e| anyhow!("Invalid task_id UUID format: {e}"))
}

/// Validate task title (1..=200 chars after trimming)
pub fn validate_title(title: &str) -> Result<()> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("title cannot be empty"));
    }

    let len = trimmed.chars().count();
    if len > MAX_TITLE_LENGTH {
        return Err(anyhow!("title too long: {len} chars (max: {MAX_TITLE_LENGTH})"));
    }

    Ok(())
}

pub fn validate_description(description: &str) -> Result<()> {
    let len = description.chars().count();
    if len > MAX_DESCRIPTION_LENGTH {
        return Err(anyhow!(
            "description too long: {len} chars (max: {MAX_DESCRIPTION_LENGTH})"
        ));
    }
    Ok(())
}

pub fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.len() > MAX_TAGS {
        return Err(anyhow!("too many tags: {} (max: {MAX_TAGS})", tags.len()));
    }
    Ok(())
}
