//! Report rendering
//!
//! Writes `report.json` and a self-contained `report.html` into the report
//! directory. When the run itself fails, a placeholder page points the
//! reader at the logs instead.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use compliance_common::{CheckRecord, Error, Report, SectionRecord};

pub const REPORT_HTML: &str = "report.html";
pub const REPORT_JSON: &str = "report.json";

const ERROR_PAGE: &str = "Sorry, something went wrong. Visit <a href=\"/logs\">/logs</a> to see details.";

const STYLE: &str = "body{font-family:sans-serif;margin:2em auto;max-width:72em;color:#222}\
table{border-collapse:collapse;width:100%;margin-bottom:1em}\
th,td{border:1px solid #ccc;padding:.4em .6em;text-align:left;vertical-align:top}\
th{background:#f3f3f3}.passed{color:#1a7f37}.failed{color:#cf222e}\
.faults{background:#fff0f0;border:1px solid #cf222e;padding:.5em 1em}\
.description{color:#555}";

/// Escape text for use in HTML content and attribute values
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Anchor id made of the alphanumeric characters of `value`
fn anchor(value: &str) -> String {
    value.chars().filter(|c| c.is_alphanumeric()).collect()
}

fn status(result: bool) -> &'static str {
    if result {
        "<span class=\"passed\">PASSED</span>"
    } else {
        "<span class=\"failed\">FAILED</span>"
    }
}

fn render_record(html: &mut String, record: &CheckRecord) {
    let _ = write!(
        html,
        "<tr><td>{}<div class=\"description\">{}</div></td><td>{}</td><td>{}</td><td>{}</td></tr>",
        escape_html(&record.name),
        escape_html(&record.description),
        escape_html(&record.outcome.measured),
        escape_html(&record.outcome.expected),
        status(record.outcome.result),
    );
}

fn render_section(html: &mut String, section: &SectionRecord) {
    let _ = write!(
        html,
        "<h2 id=\"{}\">{} {}</h2><p class=\"description\">{}</p>",
        anchor(&section.name),
        escape_html(&section.name),
        status(section.result),
        escape_html(&section.description),
    );
    render_faults(html, &section.faults);

    if section.records.is_empty() {
        return;
    }
    html.push_str("<table><tr><th>Check</th><th>Measured</th><th>Expected</th><th>Result</th></tr>");
    for record in &section.records {
        render_record(html, record);
    }
    html.push_str("</table>");
}

fn render_faults(html: &mut String, faults: &[String]) {
    if faults.is_empty() {
        return;
    }
    html.push_str("<ul class=\"faults\">");
    for fault in faults {
        let _ = write!(html, "<li>{}</li>", escape_html(fault));
    }
    html.push_str("</ul>");
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\"><title>{}</title>\
<style>{}</style></head><body>{}</body></html>\n",
        escape_html(title),
        STYLE,
        body
    )
}

/// Render the whole report as a single HTML page
pub fn render_html(report: &Report, generated_at: DateTime<Utc>) -> String {
    let mut body = String::new();
    let _ = write!(
        body,
        "<h1>Cluster compliance report {}</h1><p class=\"description\">Generated {}. \
<a href=\"/logs\">Logs</a> <a href=\"/report.json\">JSON</a></p>",
        status(report.result),
        generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    render_faults(&mut body, &report.faults);

    if !report.sections.is_empty() {
        body.push_str("<nav><ul>");
        for section in &report.sections {
            let _ = write!(
                body,
                "<li><a href=\"#{}\">{}</a> {}</li>",
                anchor(&section.name),
                escape_html(&section.name),
                status(section.result),
            );
        }
        body.push_str("</ul></nav>");
    }

    for section in &report.sections {
        render_section(&mut body, section);
    }
    page("Cluster compliance report", &body)
}

/// Page shown when no report could be produced
pub fn render_error_page() -> String {
    page("Cluster compliance report", &format!("<p>{}</p>", ERROR_PAGE))
}

/// Write `report.json` and `report.html`, returning the HTML path
pub fn write_report(directory: &Path, report: &Report) -> Result<PathBuf, Error> {
    fs::create_dir_all(directory)?;

    let json = serde_json::to_string_pretty(report)?;
    fs::write(directory.join(REPORT_JSON), json)?;

    let html_path = directory.join(REPORT_HTML);
    fs::write(&html_path, render_html(report, Utc::now()))?;
    Ok(html_path)
}

/// Write the placeholder page in place of `report.html`
pub fn write_error_page(directory: &Path) -> Result<PathBuf, Error> {
    fs::create_dir_all(directory)?;

    let html_path = directory.join(REPORT_HTML);
    fs::write(&html_path, render_error_page())?;
    Ok(html_path)
}
