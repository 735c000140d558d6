use crate::outreach::roles::SemanticRole;
use crate::table::Row;

pub const SKIP_MARKER: &str = "[SKIPPED]";
pub const ERROR_MARKER: &str = "[ERROR]";

/// What ended up in the generated column for one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Generated(String),
    /// The gate rejected the row; no completion call was made.
    Skipped { missing: Vec<SemanticRole> },
    /// The completion call failed after all attempts.
    Failed { reason: String },
}

impl Outcome {
    /// Text written to the generated column.
    pub fn cell_text(&self) -> String {
        match self {
            Outcome::Generated(text) => text.clone(),
            Outcome::Skipped { missing } => {
                let roles: Vec<&str> = missing.iter().map(|r| r.label()).collect();
                format!("{SKIP_MARKER} missing {}", roles.join(", "))
            }
            Outcome::Failed { reason } => format!("{ERROR_MARKER} {reason}"),
        }
    }
}

/// One output row: the untouched input row plus its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedRecord {
    /// Zero-based position of the row in the source table.
    pub index: usize,
    pub row: Row,
    pub outcome: Outcome,
}
