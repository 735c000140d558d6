//! Field Resolver — maps arbitrary contact-list headers onto semantic roles.
//!
//! A `FieldMapping` is built once per table and holds, for every role, the
//! candidate columns in priority order. Resolving a row picks the first
//! candidate whose value is usable, so a blank cell in the preferred column
//! falls through to the next candidate for that row only.
//!
//! Precedence:
//! 1. `FirstName`: columns containing both "first" and "name", leftmost first.
//! 2. `FirstName` fallback: any other column containing "name" that is not
//!    claimed by another role's keyword (so `company_name` is a company column).
//! 3. `Company`: "company". `Title`: "title" or "job".
//! 4. `Industry`, `City`, `State`, `Country`: the role name itself.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::outreach::roles::SemanticRole;
use crate::table::Row;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Column '{column}' mapped to {role} does not exist in the table")]
    UnknownColumn { role: SemanticRole, column: String },
}

/// Role assignments requested by the caller. `None` unassigns a role.
pub type MappingOverrides = HashMap<SemanticRole, Option<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    candidates: BTreeMap<SemanticRole, Vec<usize>>,
}

impl FieldMapping {
    /// Infers candidate columns for every role from the header alone.
    pub fn infer(columns: &[String]) -> Self {
        let lowered: Vec<String> = columns.iter().map(|c| c.to_lowercase()).collect();
        let mut candidates = BTreeMap::new();

        let strong: Vec<usize> = lowered
            .iter()
            .enumerate()
            .filter(|(_, name)| name.contains("first") && name.contains("name"))
            .map(|(i, _)| i)
            .collect();
        let fallback = lowered
            .iter()
            .enumerate()
            .filter(|(i, name)| {
                name.contains("name") && !strong.contains(i) && !claimed_by_other_role(name)
            })
            .map(|(i, _)| i);
        let first_name: Vec<usize> = strong.iter().copied().chain(fallback).collect();
        if !first_name.is_empty() {
            candidates.insert(SemanticRole::FirstName, first_name);
        }

        for role in SemanticRole::ALL
            .into_iter()
            .filter(|r| *r != SemanticRole::FirstName)
        {
            let matches: Vec<usize> = lowered
                .iter()
                .enumerate()
                .filter(|(_, name)| role.keywords().iter().any(|k| name.contains(k)))
                .map(|(i, _)| i)
                .collect();
            if !matches.is_empty() {
                candidates.insert(role, matches);
            }
        }

        Self { candidates }
    }

    /// Inferred mapping with caller overrides applied on top. An overridden
    /// role resolves from exactly the named column.
    pub fn with_overrides(
        columns: &[String],
        overrides: &MappingOverrides,
    ) -> Result<Self, MappingError> {
        let mut mapping = Self::infer(columns);

        for (role, column) in overrides {
            match column {
                None => {
                    mapping.candidates.remove(role);
                }
                Some(column) => {
                    let index = find_column(columns, column).ok_or_else(|| {
                        MappingError::UnknownColumn {
                            role: *role,
                            column: column.clone(),
                        }
                    })?;
                    mapping.candidates.insert(*role, vec![index]);
                }
            }
        }

        Ok(mapping)
    }

    /// Candidate column indices for `role`, highest priority first.
    #[cfg(test)]
    pub fn candidates(&self, role: SemanticRole) -> &[usize] {
        self.candidates.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The preferred column per role, for display in the mapping step.
    pub fn preview(&self, columns: &[String]) -> BTreeMap<SemanticRole, String> {
        self.candidates
            .iter()
            .filter_map(|(role, cols)| {
                cols.first()
                    .and_then(|&i| columns.get(i))
                    .map(|name| (*role, name.clone()))
            })
            .collect()
    }

    pub fn resolve(&self, row: &Row) -> ResolvedRoles {
        let values = self
            .candidates
            .iter()
            .filter_map(|(role, cols)| cols.iter().find_map(|&i| row.value(i)).map(|v| (*role, v)))
            .collect();
        ResolvedRoles { values }
    }
}

/// One-off resolution without keeping the mapping around.
#[cfg(test)]
pub fn resolve_row(columns: &[String], row: &Row) -> ResolvedRoles {
    FieldMapping::infer(columns).resolve(row)
}

/// Per-row result of resolution: zero or one usable value per role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRoles {
    values: BTreeMap<SemanticRole, String>,
}

impl ResolvedRoles {
    pub fn get(&self, role: SemanticRole) -> Option<&str> {
        self.values.get(&role).map(String::as_str)
    }

    pub fn has(&self, role: SemanticRole) -> bool {
        self.values.contains_key(&role)
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(SemanticRole, &str)]) -> Self {
        Self {
            values: pairs.iter().map(|(r, v)| (*r, v.to_string())).collect(),
        }
    }
}

fn claimed_by_other_role(lowered: &str) -> bool {
    SemanticRole::ALL
        .iter()
        .flat_map(|r| r.keywords())
        .any(|k| lowered.contains(k))
}

/// Exact header match first, then a case- and whitespace-insensitive one.
fn find_column(columns: &[String], wanted: &str) -> Option<usize> {
    columns.iter().position(|c| c == wanted).or_else(|| {
        let wanted = wanted.trim().to_lowercase();
        columns
            .iter()
            .position(|c| c.trim().to_lowercase() == wanted)
    })
}
