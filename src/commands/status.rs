//! `issue-reconciler status` command.

use crate::context::ServiceContext;
use crate::controller::FinalizerState;
use crate::error::Result;
use crate::ports::store::ResourceStore;
use crate::resource::IssueResource;

/// Execute the `status` command.
///
/// Prints one row per record: name, repository, title, deletion-protocol
/// state, and the last observed issue state.
///
/// # Errors
///
/// Returns an error if the records cannot be listed or read.
pub fn run(ctx: &ServiceContext) -> Result<()> {
    let store = ctx.store();
    let mut records = Vec::new();
    for key in store.list()? {
        if let Some(record) = store.get(&key)? {
            records.push(record);
        }
    }
    print!("{}", render(&records));
    Ok(())
}

fn protocol_label(record: &IssueResource) -> &'static str {
    match FinalizerState::of(record) {
        FinalizerState::NoFinalizer => "pending",
        FinalizerState::Registered => "registered",
        FinalizerState::Closing => "closing",
        FinalizerState::Released => "released",
    }
}

/// Renders the status table.
fn render(records: &[IssueResource]) -> String {
    if records.is_empty() {
        return "No records found in store.\n".to_string();
    }

    let rows: Vec<[&str; 5]> = records
        .iter()
        .map(|r| {
            let issue = if r.status.state.is_empty() { "-" } else { r.status.state.as_str() };
            [
                r.metadata.name.as_str(),
                r.spec.repo.as_str(),
                r.spec.title.as_str(),
                protocol_label(r),
                issue,
            ]
        })
        .collect();

    let header = ["NAME", "REPO", "TITLE", "FINALIZER", "ISSUE"];
    let widths: Vec<usize> = (0..header.len())
        .map(|col| {
            rows.iter().map(|row| row[col].len()).chain([header[col].len()]).max().unwrap_or(0)
        })
        .collect();

    let line = |cells: [&str; 5]| -> String {
        let padded: Vec<String> =
            cells.iter().zip(&widths).map(|(cell, width)| format!("{cell:<width$}")).collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut out = line(header);
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    out.push_str(&format!("{}\n", rule.join("  ")));
    for row in &rows {
        out.push_str(&line(*row));
    }
    out.push_str(&format!("\n{} record(s) total.\n", rows.len()));
    out
}
