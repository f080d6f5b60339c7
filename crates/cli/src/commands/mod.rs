//! Subcommand implementations

pub mod agents;
pub mod health;
pub mod predict;
pub mod route;

/// Shorten a UUID for table display
pub(crate) fn short_id(id: &impl std::fmt::Display) -> String {
    let id = id.to_string();
    if id.len() > 8 {
        format!("{}...", &id[..8])
    } else {
        id
    }
}
