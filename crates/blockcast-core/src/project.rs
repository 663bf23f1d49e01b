//! Project identifiers.

/// Maximum project id length in bytes.
pub const MAX_PROJECT_ID_LENGTH: usize = 256;

/// Validate a project id received at a connection boundary.
///
/// # Errors
///
/// Returns a reason if the id is empty, too long, or contains anything but
/// printable ASCII.
pub fn validate_project_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Project id cannot be empty");
    }
    if id.len() > MAX_PROJECT_ID_LENGTH {
        return Err("Project id too long");
    }
    if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Project id contains invalid characters");
    }
    Ok(())
}
