use crate::server::response::ApiError;

const MAX_REPO_NAME_LEN: usize = 100;

fn is_valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

/// Repo names travel in subjects and URL paths, so they stay short and plain.
pub fn validate_repo_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::bad_request("Repository name cannot be empty"));
    }
    if name.len() > MAX_REPO_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "Repository name cannot exceed {MAX_REPO_NAME_LEN} characters"
        )));
    }
    if !name.chars().all(is_valid_name_char) {
        return Err(ApiError::bad_request(
            "Repository name can only contain alphanumeric characters, hyphens, underscores, and periods",
        ));
    }
    if name == "." || name == ".." {
        return Err(ApiError::bad_request("Repository name cannot be . or .."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_repo_name() {
        assert!(validate_repo_name("deep-sea_1.0").is_ok());
        assert!(validate_repo_name("").is_err());
        assert!(validate_repo_name("has space").is_err());
        assert!(validate_repo_name("a/b").is_err());
        assert!(validate_repo_name("..").is_err());
        assert!(validate_repo_name(&"x".repeat(101)).is_err());
    }
}
