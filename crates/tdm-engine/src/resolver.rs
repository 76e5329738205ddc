//! Relationship resolution and upsert planning.
//!
//! Relationship fields cannot be copied as raw foreign keys because the
//! target assigns its own identifiers. Foreign relationships are rewritten to
//! `<relationshipName>.<externalId>` references resolved by the target at
//! upsert time. Self relationships may point at rows that do not exist on the
//! target yet, so they are dropped from the first pass and applied by one
//! follow-up pass each once the first pass has landed.

use std::fmt;

use serde::Serialize;

use tdm_core::{MaskMap, OperationDescriptor, RelationshipDescriptor};

use crate::platform::QueryRequest;

/// Which pass of an operation a plan implements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanPass {
    /// Fields and foreign references, no self references.
    Primary,
    /// Re-links one self relationship after the primary pass.
    SelfReference { relationship: String },
}

impl fmt::Display for PlanPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanPass::Primary => f.write_str("primary"),
            PlanPass::SelfReference { relationship } => write!(f, "self:{relationship}"),
        }
    }
}

/// One fetch → flatten → mask → upsert unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertPlan {
    pub pass: PlanPass,
    pub object: String,
    /// Fields to fetch and upsert, relationship references in dotted form.
    pub fields: Vec<String>,
    pub filter: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<u64>,
    /// Masks restricted to `fields`.
    pub masks: MaskMap,
}

impl UpsertPlan {
    pub fn query(&self) -> QueryRequest {
        QueryRequest {
            object: self.object.clone(),
            fields: self.fields.clone(),
            filter: self.filter.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
        }
    }
}

/// Split relationships into (self, foreign) relative to `owner`, keeping order.
pub fn partition_relationships(
    owner: &str,
    relationships: &[RelationshipDescriptor],
) -> (Vec<RelationshipDescriptor>, Vec<RelationshipDescriptor>) {
    relationships
        .iter()
        .cloned()
        .partition(|relationship| relationship.is_self_for(owner))
}

/// Replace each local relationship field by its dotted external-id reference.
///
/// Positions are preserved. When several relationships declare the same
/// field the first one wins; a field equal to its own rewrite target is left
/// unchanged, so rewriting is idempotent. A reference that is already listed
/// keeps its first position only.
pub fn rewrite_fields(fields: &[String], relationships: &[RelationshipDescriptor]) -> Vec<String> {
    let mut rewritten: Vec<String> = Vec::with_capacity(fields.len());
    for field in fields {
        let field = relationships
            .iter()
            .find(|relationship| &relationship.field == field)
            .map(RelationshipDescriptor::dotted_reference)
            .unwrap_or_else(|| field.clone());
        if !rewritten.contains(&field) {
            rewritten.push(field);
        }
    }
    rewritten
}

/// Conjoin `<field> != null` onto an optional base filter.
pub fn not_null_filter(base: Option<&str>, field: &str) -> String {
    let clause = format!("{field} != null");
    match base.map(str::trim).filter(|base| !base.is_empty()) {
        None => clause,
        Some(base) if has_top_level_or(base) => format!("({base}) and {clause}"),
        Some(base) => format!("{base} and {clause}"),
    }
}

fn has_top_level_or(filter: &str) -> bool {
    let mut depth = 0_i32;
    let mut in_quote = false;
    let lower = filter.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    for (idx, byte) in bytes.iter().enumerate() {
        match byte {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => depth -= 1,
            b' ' if !in_quote && depth == 0 => {
                if lower[idx..].starts_with(" or ") {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Ordered plans for an operation: the primary pass, then one pass per self
/// relationship.
pub fn build_plans(op: &OperationDescriptor) -> Vec<UpsertPlan> {
    let (self_relationships, foreign) = partition_relationships(&op.object, &op.relationships);

    let remaining: Vec<String> = op
        .fields
        .iter()
        .filter(|field| {
            !self_relationships
                .iter()
                .any(|relationship| references(relationship, field))
        })
        .cloned()
        .collect();
    let primary_fields = rewrite_fields(&remaining, &foreign);

    let mut plans = Vec::with_capacity(1 + self_relationships.len());
    plans.push(UpsertPlan {
        pass: PlanPass::Primary,
        object: op.object.clone(),
        masks: masks_for(&op.masks, &primary_fields),
        fields: primary_fields,
        filter: op.filter.clone(),
        order_by: op.order_by.clone(),
        limit: op.limit,
    });

    for relationship in &self_relationships {
        let fields = vec![op.external_id.clone(), relationship.dotted_reference()];
        plans.push(UpsertPlan {
            pass: PlanPass::SelfReference {
                relationship: relationship.relationship_name.clone(),
            },
            object: op.object.clone(),
            masks: masks_for(&op.masks, &fields),
            fields,
            filter: Some(not_null_filter(op.filter.as_deref(), &relationship.field)),
            order_by: op.order_by.clone(),
            limit: op.limit,
        });
    }

    plans
}

/// True when `field` names `relationship` in local, dotted or flattened form.
fn references(relationship: &RelationshipDescriptor, field: &str) -> bool {
    field == relationship.field
        || field == relationship.dotted_reference()
        || field == relationship.underscore_reference()
}

fn masks_for(masks: &MaskMap, fields: &[String]) -> MaskMap {
    masks
        .iter()
        .filter(|(field, _)| fields.contains(field))
        .map(|(field, method)| (field.clone(), *method))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_top_level_or_only() {
        assert!(has_top_level_or("Type = 'A' or Type = 'B'"));
        assert!(has_top_level_or("Type = 'A' OR Type = 'B'"));
        assert!(!has_top_level_or("(Type = 'A' or Type = 'B') and X = 1"));
        assert!(!has_top_level_or("Name = 'this or that'"));
        assert!(!has_top_level_or("Color__c = 'red'"));
    }
}
