//! Pure per-row consistency classification.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::DocumentRow;
use crate::reference::ReferenceIndex;
use crate::resolver::BatchResolution;
use crate::types::{BodyId, DocumentKey, EntityId, ItemId, RepositoryId};

/// Consistency rule a row violated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Repository's body is not among the item's linked bodies.
    LinkedEntityMismatch,
    /// Row references a repository that does not exist.
    DanglingRepository,
}

impl ReasonCode {
    /// Stable machine code, as persisted.
    pub fn code(self) -> &'static str {
        match self {
            Self::LinkedEntityMismatch => "linked_entity_mismatch",
            Self::DanglingRepository => "dangling_repository",
        }
    }

    /// Human description for reports.
    pub fn description(self) -> &'static str {
        match self {
            Self::LinkedEntityMismatch => "linked-entity mismatch",
            Self::DanglingRepository => "repository reference not found",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Why a row could not be classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionCause {
    /// Repository reference absent or not an id.
    MissingRepository,
    /// Item reference absent or not an id.
    MissingItem,
    /// Repository exists but carries no body.
    RepositoryWithoutBody,
    /// Item not found, or found without linked bodies.
    NoLinkingData,
}

impl ExclusionCause {
    /// Stable machine code, as persisted.
    pub fn code(self) -> &'static str {
        match self {
            Self::MissingRepository => "missing_repository",
            Self::MissingItem => "missing_item",
            Self::RepositoryWithoutBody => "repository_without_body",
            Self::NoLinkingData => "no_linking_data",
        }
    }
}

impl fmt::Display for ExclusionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Evidence for one violation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchRecord {
    /// Primary row key.
    pub document_key: DocumentKey,
    /// Repository the row references.
    pub repository: RepositoryId,
    /// Item the row references.
    pub item: ItemId,
    /// Violated rule.
    pub reason: ReasonCode,
    /// Body the repository says owns the row, when known.
    pub expected_body: Option<BodyId>,
    /// Bodies the item is linked to.
    pub linked_bodies: Vec<BodyId>,
}

impl MismatchRecord {
    /// Entity counted in the reason's distinct set.
    pub fn entity_id(&self) -> &EntityId {
        &self.item
    }
}

/// Outcome of classifying one row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// All rules hold.
    Consistent,
    /// A rule is violated.
    Violation(MismatchRecord),
    /// Row lacks what a decision needs; counted apart from both outcomes.
    Undeterminable(ExclusionCause),
}

/// Classify one row against the reference index and the batch resolution.
///
/// Deterministic and side-effect free. Rules apply in order:
/// missing references, dangling repository, repository without body,
/// missing linking data, body mismatch.
pub fn classify(
    row: &DocumentRow,
    references: &ReferenceIndex,
    resolution: &BatchResolution,
) -> Classification {
    let Some(repository_id) = row.repository.as_present() else {
        return Classification::Undeterminable(ExclusionCause::MissingRepository);
    };
    let Some(item_id) = row.item.as_present() else {
        return Classification::Undeterminable(ExclusionCause::MissingItem);
    };
    let links = resolution.item(item_id);
    let linked_bodies = || -> Vec<BodyId> {
        links
            .map(|links| links.bodies.iter().cloned().collect())
            .unwrap_or_default()
    };
    let Some(repository) = references.repository(repository_id) else {
        return Classification::Violation(MismatchRecord {
            document_key: row.key.clone(),
            repository: repository_id.to_string(),
            item: item_id.to_string(),
            reason: ReasonCode::DanglingRepository,
            expected_body: None,
            linked_bodies: linked_bodies(),
        });
    };
    let Some(expected_body) = repository.body.as_deref() else {
        return Classification::Undeterminable(ExclusionCause::RepositoryWithoutBody);
    };
    let Some(links) = links.filter(|links| !links.is_empty()) else {
        return Classification::Undeterminable(ExclusionCause::NoLinkingData);
    };
    if links.bodies.contains(expected_body) {
        return Classification::Consistent;
    }
    Classification::Violation(MismatchRecord {
        document_key: row.key.clone(),
        repository: repository_id.to_string(),
        item: item_id.to_string(),
        reason: ReasonCode::LinkedEntityMismatch,
        expected_body: Some(expected_body.to_string()),
        linked_bodies: linked_bodies(),
    })
}
