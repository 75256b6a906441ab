use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use enlist_core::job::{Job, MemberRecord};

/// One row of a member list. Unknown columns are ignored.
#[derive(Debug, Deserialize)]
struct MemberRow {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl From<MemberRow> for MemberRecord {
    fn from(row: MemberRow) -> Self {
        let name = row.name.or_else(|| {
            let joined = [row.first_name, row.last_name]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            let joined = joined.trim();
            (!joined.is_empty()).then(|| joined.to_string())
        });
        Self {
            id: row.id,
            username: row.username,
            name,
        }
    }
}

/// Members loaded from a CSV file.
#[derive(Debug, Default)]
pub struct MemberList {
    pub jobs: Vec<Job>,
    /// Rows with neither a username nor an id.
    pub skipped_rows: usize,
}

pub fn load_members(path: &Path) -> Result<MemberList> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open member list: {}", path.display()))?;
    read_members(file).with_context(|| format!("Invalid member list: {}", path.display()))
}

/// Read a CSV with a header row containing any of `id`, `username`, `name`,
/// `first_name`, `last_name`.
pub fn read_members<R: io::Read>(reader: R) -> Result<MemberList> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut list = MemberList::default();
    for (index, row) in csv.deserialize::<MemberRow>().enumerate() {
        // Header is line 1.
        let row = row.with_context(|| format!("Failed to parse line {}", index + 2))?;
        match Job::try_from(MemberRecord::from(row)) {
            Ok(job) => list.jobs.push(job),
            Err(e) => {
                tracing::warn!(line = index + 2, error = %e, "Skipping member row");
                list.skipped_rows += 1;
            }
        }
    }
    Ok(list)
}
