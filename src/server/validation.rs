use crate::deploy::SETTING_DEFAULT_PHP;
use crate::deploy::topology::validate_php_version;
use crate::server::response::ApiError;
use crate::types::Permission;

const MAX_USERNAME_LEN: usize = 64;
const MAX_SETTING_KEY_LEN: usize = 64;

pub fn validate_username(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Username cannot be empty".to_string());
    }
    if name.len() > MAX_USERNAME_LEN {
        return Err(format!("Username cannot exceed {MAX_USERNAME_LEN} characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(
            "Username can only contain alphanumeric characters, hyphens, underscores, and periods"
                .to_string(),
        );
    }
    if name.starts_with(['-', '_', '.']) {
        return Err("Username must start with a letter or digit".to_string());
    }
    Ok(())
}

pub fn validate_setting_key(key: &str) -> Result<(), ApiError> {
    if key.is_empty() || key.len() > MAX_SETTING_KEY_LEN {
        return Err(ApiError::bad_request(format!(
            "Setting key must be 1 to {MAX_SETTING_KEY_LEN} characters"
        )));
    }
    if !key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(ApiError::bad_request(
            "Setting key can only contain lowercase letters, digits, and underscores",
        ));
    }
    Ok(())
}

/// Rejects values the orchestrator would fail on later.
pub fn validate_setting_value(key: &str, value: &str) -> Result<(), ApiError> {
    match key {
        SETTING_DEFAULT_PHP | crate::deploy::SETTING_WORDPRESS_MAX_PHP => {
            validate_php_version(value.trim()).map_err(ApiError::from)
        }
        _ => Ok(()),
    }
}

pub fn parse_permissions(perms: &[String]) -> Result<Permission, ApiError> {
    let mut result = Permission::default();
    for p in perms {
        let parsed = Permission::parse(p)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid permission: {p}")))?;
        result = result.union(parsed);
    }
    Ok(result)
}
