//! Persisted key layout.

use paramgrid_core::{ConfigId, ConfigKind};
use uuid::Uuid;

use crate::error::{StateError, StateResult};

const PLACEMENTS: &str = "placements";

/// `{kind}/{org}/{name}/{version}`
pub fn config_key(kind: ConfigKind, id: &ConfigId) -> String {
    format!("{}/{}/{}/{}", kind.as_str(), id.org, id.name, id.version)
}

/// `{kind}/{org}/`
pub fn config_org_prefix(kind: ConfigKind, org: &str) -> StateResult<String> {
    validate_org(org)?;
    Ok(format!("{}/{}/", kind.as_str(), org))
}

/// `placements/{kind}/{org}/{name}/{version}/{task_id}`
pub fn placement_key(kind: ConfigKind, id: &ConfigId, task_id: &Uuid) -> String {
    format!("{}{}", placement_config_prefix(kind, id), task_id)
}

/// `placements/{kind}/{org}/{name}/{version}/`
pub fn placement_config_prefix(kind: ConfigKind, id: &ConfigId) -> String {
    format!(
        "{PLACEMENTS}/{}/{}/{}/{}/",
        kind.as_str(),
        id.org,
        id.name,
        id.version
    )
}

/// `placements/{kind}/{org}/`
pub fn placement_org_prefix(kind: ConfigKind, org: &str) -> StateResult<String> {
    validate_org(org)?;
    Ok(format!("{PLACEMENTS}/{}/{}/", kind.as_str(), org))
}

/// Reject identity segments that would break prefix scans.
pub fn validate_id(id: &ConfigId) -> StateResult<()> {
    for (field, value) in [("org", &id.org), ("name", &id.name), ("version", &id.version)] {
        validate_segment(field, value)?;
    }
    Ok(())
}

/// An org must be a single non-empty key segment.
pub fn validate_org(org: &str) -> StateResult<()> {
    validate_segment("org", org)
}

fn validate_segment(field: &str, value: &str) -> StateResult<()> {
    if value.is_empty() {
        return Err(StateError::InvalidConfig(format!("{field} must not be empty")));
    }
    if value.contains('/') {
        return Err(StateError::InvalidConfig(format!(
            "{field} must not contain '/': {value}"
        )));
    }
    Ok(())
}
