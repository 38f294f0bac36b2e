//! Restrict the catalog to the sections and checks picked on the command line

use std::collections::BTreeMap;

use crate::error::{AuditError, AuditResult};
use crate::section::Section;

/// Parse `section` / `section.check` selectors into a map of section id to
/// selected check ids. An empty check list selects the whole section.
pub fn parse_selectors<S: AsRef<str>>(selectors: &[S]) -> AuditResult<BTreeMap<String, Vec<String>>> {
    let mut parsed: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for selector in selectors {
        let selector = selector.as_ref();
        let parts: Vec<&str> = selector.split('.').collect();

        match parts.as_slice() {
            [section] if !section.is_empty() => {
                parsed.entry(section.to_string()).or_default();
            }
            [section, check] if !section.is_empty() && !check.is_empty() => {
                parsed
                    .entry(section.to_string())
                    .or_default()
                    .push(check.to_string());
            }
            _ => return Err(AuditError::InvalidSelector(selector.to_string())),
        }
    }

    Ok(parsed)
}

/// Sections of `catalog` matching `selectors`, in catalog order.
///
/// Without selectors the whole catalog is returned. Selected sections are
/// copies; filtering never touches the catalog itself.
pub fn discover_sections<S: AsRef<str>>(catalog: &[Section], selectors: &[S]) -> AuditResult<Vec<Section>> {
    tracing::debug!("Discovering sections and checks...");
    let wanted = parse_selectors(selectors)?;

    for id in wanted.keys() {
        if !catalog.iter().any(|section| section.id() == id) {
            tracing::warn!(section = %id, "Unknown section selected");
        }
    }

    let mut sections = Vec::new();
    for section in catalog {
        let mut section = section.clone();
        if !wanted.is_empty() {
            match wanted.get(section.id()) {
                None => continue,
                Some(checks) if !checks.is_empty() => {
                    section.retain_checks(|id| checks.iter().any(|c| c == id));
                }
                Some(_) => {}
            }
        }
        tracing::debug!(section = section.name(), "Discovered section");
        sections.push(section);
    }

    Ok(sections)
}
