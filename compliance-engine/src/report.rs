//! Result aggregation

use std::collections::BTreeSet;

use crate::check::log_result;
use compliance_common::{CheckRecord, Report, SectionRecord};

/// Sorted set of unique faults
pub fn unique_sorted<I, S>(faults: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    faults
        .into_iter()
        .map(Into::into)
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Fold check records into a section record.
///
/// `None` when no check produced a record.
pub fn aggregate_section(
    name: &str,
    description: &str,
    records: Vec<CheckRecord>,
) -> Option<SectionRecord> {
    if records.is_empty() {
        tracing::debug!(section = name, "Section {} SKIPPED", name);
        return None;
    }

    let result = records.iter().all(|record| record.outcome.result);
    let faults = unique_sorted(
        records
            .iter()
            .filter_map(|record| record.outcome.fault.as_deref()),
    );
    log_result(&format!("Section {}", name), result);

    Some(SectionRecord {
        name: name.to_string(),
        description: description.to_string(),
        result,
        records,
        faults,
    })
}

/// Fold section records into the final report
pub fn aggregate_report(sections: Vec<SectionRecord>) -> Report {
    if sections.is_empty() {
        tracing::error!("No sections to run");
    }

    let result = sections.iter().all(|section| section.result);
    let faults = unique_sorted(
        sections
            .iter()
            .flat_map(|section| section.faults.iter().map(String::as_str)),
    );
    log_result("Final result:", result);

    Report {
        result,
        sections,
        faults,
    }
}
