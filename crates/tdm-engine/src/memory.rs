//! In-memory platform.
//!
//! Backs snapshot-driven runs and tests. It understands the small query
//! subset the engine emits (dotted relationship fields, `count(..)`
//! aggregates, `and`-joined equality/null filters, `order by`, limits) and
//! applies bulk jobs the way the remote platform does: target-assigned
//! identifiers, external-id addressing, and per-record failures for
//! unresolvable references.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use tdm_core::{JobKind, JobOutcome, NestedRecord, Record};

use crate::platform::{BulkJobTarget, PlatformError, QueryRequest, QuerySource};

const ID_FIELD: &str = "Id";

/// One submitted job, as seen by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobLogEntry {
    pub kind: JobKind,
    pub object: String,
    pub records: usize,
}

#[derive(Debug, Clone)]
struct Rejection {
    object: String,
    field: String,
    value: String,
    message: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, Vec<NestedRecord>>,
    rejections: Vec<Rejection>,
    failing_objects: BTreeSet<String>,
    jobs: Vec<JobLogEntry>,
}

/// Thread-safe in-memory source/target platform.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    state: Mutex<MemoryState>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `object` with records (builder form of [`MemoryPlatform::load`]).
    ///
    /// The builder owns the only handle to the lock, so it cannot be
    /// poisoned and seeding cannot fail.
    pub fn with_records(mut self, object: &str, records: Vec<NestedRecord>) -> Self {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state
            .objects
            .entry(object.to_string())
            .or_default()
            .extend(records);
        self
    }

    /// Append records to `object` as-is.
    pub fn load(&self, object: &str, records: Vec<NestedRecord>) -> Result<(), PlatformError> {
        self.lock()?
            .objects
            .entry(object.to_string())
            .or_default()
            .extend(records);
        Ok(())
    }

    /// Current records of `object`.
    pub fn records(&self, object: &str) -> Result<Vec<NestedRecord>, PlatformError> {
        Ok(self.lock()?.objects.get(object).cloned().unwrap_or_default())
    }

    /// Snapshot of every object.
    pub fn export(&self) -> Result<BTreeMap<String, Vec<NestedRecord>>, PlatformError> {
        Ok(self.lock()?.objects.clone())
    }

    /// Reject every submitted `object` record whose `field` equals `value`.
    pub fn reject_records(
        &self,
        object: &str,
        field: &str,
        value: &str,
        message: &str,
    ) -> Result<(), PlatformError> {
        self.lock()?.rejections.push(Rejection {
            object: object.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    /// Make job creation fail for `object`.
    pub fn fail_jobs(&self, object: &str) -> Result<(), PlatformError> {
        self.lock()?.failing_objects.insert(object.to_string());
        Ok(())
    }

    /// Jobs submitted so far, in submission order.
    pub fn job_log(&self) -> Result<Vec<JobLogEntry>, PlatformError> {
        Ok(self.lock()?.jobs.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, PlatformError> {
        self.state
            .lock()
            .map_err(|_| PlatformError::Transport("memory platform lock poisoned".to_string()))
    }
}

#[async_trait]
impl QuerySource for MemoryPlatform {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<NestedRecord>, PlatformError> {
        let clauses = parse_filter(request.filter.as_deref())?;
        let ordering = parse_order_by(request.order_by.as_deref())?;
        let state = self.lock()?;
        let rows = state
            .objects
            .get(&request.object)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut matched: Vec<&NestedRecord> = rows
            .iter()
            .filter(|row| clauses.iter().all(|clause| clause.matches(row)))
            .collect();

        if let Some(alias) = count_alias(&request.fields)? {
            let mut row = Map::new();
            row.insert(alias, Value::from(matched.len() as u64));
            return Ok(vec![row]);
        }

        if !ordering.is_empty() {
            matched.sort_by(|a, b| {
                ordering
                    .iter()
                    .map(|(field, descending)| {
                        let ord = compare_values(lookup(a, field), lookup(b, field));
                        if *descending { ord.reverse() } else { ord }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        if let Some(limit) = request.limit {
            matched.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        Ok(matched
            .into_iter()
            .map(|row| project(row, &request.fields))
            .collect())
    }
}

#[async_trait]
impl BulkJobTarget for MemoryPlatform {
    async fn run_job(
        &self,
        kind: JobKind,
        object: &str,
        external_id: Option<&str>,
        records: Vec<Record>,
    ) -> Result<Vec<JobOutcome>, PlatformError> {
        let mut state = self.lock()?;
        if state.failing_objects.contains(object) {
            return Err(PlatformError::Transport(format!(
                "unable to create {kind} job for {object}"
            )));
        }
        let external_id = match (kind.requires_external_id(), external_id) {
            (true, None) => {
                return Err(PlatformError::InvalidRequest(format!(
                    "{kind} job on {object} requires an external id field"
                )));
            }
            (_, external_id) => external_id,
        };

        state.jobs.push(JobLogEntry {
            kind,
            object: object.to_string(),
            records: records.len(),
        });

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(state.apply(kind, object, external_id, record));
        }
        Ok(outcomes)
    }
}

impl MemoryState {
    fn apply(
        &mut self,
        kind: JobKind,
        object: &str,
        external_id: Option<&str>,
        record: Record,
    ) -> JobOutcome {
        if let Some(rejection) = self.rejections.iter().find(|rejection| {
            rejection.object == object
                && record.text(&rejection.field).as_deref() == Some(rejection.value.as_str())
        }) {
            return JobOutcome::failed(record.text(ID_FIELD), rejection.message.clone());
        }

        match kind {
            JobKind::Delete => self.delete(object, external_id.unwrap_or(ID_FIELD), &record),
            JobKind::Insert => match self.materialize(object, record) {
                Ok(row) => self.insert(object, row),
                Err(message) => JobOutcome::failed(None, message),
            },
            JobKind::Upsert | JobKind::Update => {
                let Some(field) = external_id else {
                    return JobOutcome::failed(None, "missing external id field");
                };
                let Some(key) = record.text(field) else {
                    return JobOutcome::failed(None, format!("missing value for {field}"));
                };
                let row = match self.materialize(object, record) {
                    Ok(row) => row,
                    Err(message) => return JobOutcome::failed(None, message),
                };
                let existing = self.position(object, field, &key);
                match (existing, kind) {
                    (Some(index), _) => self.merge(object, index, row),
                    (None, JobKind::Upsert) => self.insert(object, row),
                    (None, _) => JobOutcome::failed(
                        None,
                        format!("no {object} record with {field} = {key}"),
                    ),
                }
            }
        }
    }

    fn delete(&mut self, object: &str, key: &str, record: &Record) -> JobOutcome {
        let Some(id) = record.text(key) else {
            return JobOutcome::failed(None, format!("missing {key}"));
        };
        match self.position(object, key, &id) {
            Some(index) => {
                if let Some(rows) = self.objects.get_mut(object) {
                    rows.remove(index);
                }
                JobOutcome::succeeded(id)
            }
            None => JobOutcome::failed(Some(id), "entity is deleted"),
        }
    }

    fn insert(&mut self, object: &str, mut row: NestedRecord) -> JobOutcome {
        let id = uuid::Uuid::new_v4().to_string();
        row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        self.objects.entry(object.to_string()).or_default().push(row);
        JobOutcome::succeeded(id)
    }

    fn merge(&mut self, object: &str, index: usize, mut row: NestedRecord) -> JobOutcome {
        row.remove(ID_FIELD);
        let Some(existing) = self
            .objects
            .get_mut(object)
            .and_then(|rows| rows.get_mut(index))
        else {
            return JobOutcome::failed(None, "record vanished during update");
        };
        existing.extend(row);
        let id = existing.get(ID_FIELD).and_then(text_of).unwrap_or_default();
        JobOutcome::succeeded(id)
    }

    fn position(&self, object: &str, field: &str, key: &str) -> Option<usize> {
        self.objects.get(object)?.iter().position(|row| {
            row.get(field).and_then(text_of).as_deref() == Some(key)
        })
    }

    /// Turn a flat submitted record into a stored row, resolving dotted
    /// `<relationship>.<externalId>` references to target identifiers.
    fn materialize(&self, object: &str, record: Record) -> Result<NestedRecord, String> {
        let mut row = Map::new();
        for (field, value) in record {
            let Some((relationship, reference_field)) = field.split_once('.') else {
                row.insert(field, value.to_json());
                continue;
            };
            let local = local_field(relationship);
            if value.is_null() {
                row.insert(local, Value::Null);
                row.insert(relationship.to_string(), Value::Null);
                continue;
            }
            let key = value.to_string();
            let id = self
                .resolve_reference(object, reference_field, &key)
                .ok_or_else(|| format!("foreign key external id not found: {field} = {key}"))?;
            let mut nested = Map::new();
            nested.insert(reference_field.to_string(), value.to_json());
            row.insert(local, Value::String(id));
            row.insert(relationship.to_string(), Value::Object(nested));
        }
        Ok(row)
    }

    fn resolve_reference(&self, object: &str, field: &str, key: &str) -> Option<String> {
        let same_object = self.objects.get(object).into_iter();
        let others = self
            .objects
            .iter()
            .filter(|(name, _)| name.as_str() != object)
            .map(|(_, rows)| rows);
        same_object
            .chain(others)
            .flat_map(|rows| rows.iter())
            .find(|row| row.get(field).and_then(text_of).as_deref() == Some(key))
            .and_then(|row| row.get(ID_FIELD).and_then(text_of))
    }
}

/// Local foreign-key field behind a relationship path (`Parent` → `ParentId`,
/// `Account__r` → `Account__c`).
fn local_field(relationship: &str) -> String {
    match relationship.strip_suffix("__r") {
        Some(stem) => format!("{stem}__c"),
        None => format!("{relationship}Id"),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn lookup<'a>(row: &'a NestedRecord, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = row.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current).filter(|value| !value.is_null())
}

fn project(row: &NestedRecord, fields: &[String]) -> NestedRecord {
    let mut out = Map::new();
    for field in fields {
        let segments: Vec<&str> = field.split('.').collect();
        project_path(&mut out, row, &segments);
    }
    out
}

fn project_path(out: &mut NestedRecord, source: &NestedRecord, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        out.insert(
            head.to_string(),
            source.get(*head).cloned().unwrap_or(Value::Null),
        );
        return;
    }
    match source.get(*head) {
        Some(Value::Object(inner)) => {
            let entry = out
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner_out) = entry {
                project_path(inner_out, inner, rest);
            }
        }
        _ => {
            out.entry(head.to_string()).or_insert(Value::Null);
        }
    }
}

fn count_alias(fields: &[String]) -> Result<Option<String>, PlatformError> {
    let Some(aggregate) = fields
        .iter()
        .find(|field| field.trim_start().to_ascii_lowercase().starts_with("count("))
    else {
        return Ok(None);
    };
    if fields.len() > 1 {
        return Err(PlatformError::Unsupported(
            "aggregate queries cannot select other fields".to_string(),
        ));
    }
    let alias = aggregate
        .rsplit_once(')')
        .map(|(_, alias)| alias.trim())
        .filter(|alias| !alias.is_empty())
        .unwrap_or("expr0");
    Ok(Some(alias.to_string()))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(a), Some(b)) => text_of(a).cmp(&text_of(b)),
    }
}

fn parse_order_by(order_by: Option<&str>) -> Result<Vec<(String, bool)>, PlatformError> {
    let Some(order_by) = order_by else {
        return Ok(Vec::new());
    };
    order_by
        .split(',')
        .map(|part| {
            let mut tokens = part.split_whitespace();
            let field = tokens.next().ok_or_else(|| {
                PlatformError::InvalidRequest(format!("empty order by term in '{order_by}'"))
            })?;
            let descending = match tokens.next().map(|token| token.to_ascii_lowercase()) {
                None => false,
                Some(direction) if direction == "asc" => false,
                Some(direction) if direction == "desc" => true,
                Some(other) => {
                    return Err(PlatformError::Unsupported(format!(
                        "order by direction '{other}'"
                    )));
                }
            };
            Ok((field.to_string(), descending))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    IsNull(String),
    NotNull(String),
    Equals(String, String),
    NotEquals(String, String),
}

impl Clause {
    fn matches(&self, row: &NestedRecord) -> bool {
        match self {
            Clause::IsNull(field) => lookup(row, field).is_none(),
            Clause::NotNull(field) => lookup(row, field).is_some(),
            Clause::Equals(field, expected) => {
                lookup(row, field).and_then(text_of).as_deref() == Some(expected.as_str())
            }
            Clause::NotEquals(field, expected) => {
                lookup(row, field).and_then(text_of).as_deref() != Some(expected.as_str())
            }
        }
    }
}

fn parse_filter(filter: Option<&str>) -> Result<Vec<Clause>, PlatformError> {
    let Some(filter) = filter.map(str::trim).filter(|filter| !filter.is_empty()) else {
        return Ok(Vec::new());
    };
    let mut clauses = Vec::new();
    for part in split_top_level(filter, " and ") {
        let part = part.trim();
        if split_top_level(part, " or ").len() > 1 {
            return Err(PlatformError::Unsupported(format!(
                "'or' filters are not supported: {part}"
            )));
        }
        if let Some(inner) = part.strip_prefix('(').and_then(|p| p.strip_suffix(')')) {
            clauses.extend(parse_filter(Some(inner))?);
            continue;
        }
        clauses.push(parse_clause(part)?);
    }
    Ok(clauses)
}

fn parse_clause(clause: &str) -> Result<Clause, PlatformError> {
    let (field, negated, value) = if let Some((field, value)) = clause.split_once("!=") {
        (field, true, value)
    } else if let Some((field, value)) = clause.split_once('=') {
        (field, false, value)
    } else {
        return Err(PlatformError::Unsupported(format!(
            "filter clause '{clause}'"
        )));
    };
    let field = field.trim().to_string();
    let value = value.trim();
    if value.eq_ignore_ascii_case("null") {
        return Ok(if negated {
            Clause::NotNull(field)
        } else {
            Clause::IsNull(field)
        });
    }
    let value = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
        .to_string();
    Ok(if negated {
        Clause::NotEquals(field, value)
    } else {
        Clause::Equals(field, value)
    })
}

/// Split on a lowercase keyword separator outside quotes and parentheses.
fn split_top_level<'a>(input: &'a str, separator: &str) -> Vec<&'a str> {
    let lower = input.to_ascii_lowercase();
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut in_quote = false;
    let mut start = 0;
    let mut idx = 0;
    let bytes = lower.as_bytes();
    while idx < bytes.len() {
        match bytes[idx] {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => depth -= 1,
            _ if !in_quote && depth == 0 && bytes[idx..].starts_with(separator.as_bytes()) => {
                parts.push(&input[start..idx]);
                idx += separator.len();
                start = idx;
                continue;
            }
            _ => {}
        }
        idx += 1;
    }
    parts.push(&input[start..]);
    parts
}
