//! Document model shared by every storage backend.
//!
//! A document is a JSON object addressed by a [`DocId`]. Collections hold
//! documents; some documents embed arrays of sub-records (signings, manager
//! accounts). The types here describe *what* to select and *how* to mutate a
//! single document, so that backends can execute each command atomically.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DbError;

/// Field map of one document (or one embedded array element).
pub type Fields = serde_json::Map<String, Value>;

// ── Identifiers ─────────────────────────────────────────────────

/// Storage-assigned identifier of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub Uuid);

impl DocId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for DocId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A stored document: its id plus its (possibly projected) fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocId,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: DocId, fields: Fields) -> Self {
        Self { id, fields }
    }

    /// Decode the fields into a typed record.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, DbError> {
        serde_json::from_value(Value::Object(self.fields))
            .map_err(|e| DbError::System(anyhow!("decode document {}: {e}", self.id)))
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Elements of an embedded array; empty when the field is absent.
    pub fn array(&self, name: &str) -> &[Value] {
        self.fields
            .get(name)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Decode every element of an embedded array.
    pub fn decode_array<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, DbError> {
        self.array(name)
            .iter()
            .map(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| DbError::System(anyhow!("decode {name} element: {e}")))
            })
            .collect()
    }
}

/// Serialize a record into a document field map.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, DbError> {
    match serde_json::to_value(value).map_err(|e| DbError::System(anyhow!(e)))? {
        Value::Object(map) => Ok(map),
        other => Err(DbError::System(anyhow!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Element filter ──────────────────────────────────────────────

/// Predicate over one embedded array element: a conjunction of field
/// equalities. An empty filter matches every object element.
///
/// Values are expected to be scalars; backends may implement equality as
/// JSON containment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElemFilter(BTreeMap<String, Value>);

impl ElemFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn matches(&self, elem: &Value) -> bool {
        let Some(obj) = elem.as_object() else {
            return false;
        };
        self.0.iter().all(|(k, v)| obj.get(k) == Some(v))
    }

    /// JSON object form, used by backends that evaluate containment.
    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }
}

// ── Document filter ─────────────────────────────────────────────

/// One condition of a [`DocFilter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    IdEq(DocId),
    IdIn(Vec<DocId>),
    /// Top-level field equals a scalar.
    Eq(String, Value),
    /// Top-level field equals one of the scalars.
    In(String, Vec<Value>),
    /// Some element of `array` matches `elem` (`exists = true`), or none
    /// does (`exists = false`). A missing array has no elements.
    ElemMatch {
        array: String,
        elem: ElemFilter,
        exists: bool,
    },
}

impl Cond {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Cond::IdEq(id) => doc.id == *id,
            Cond::IdIn(ids) => ids.contains(&doc.id),
            Cond::Eq(field, value) => doc.fields.get(field) == Some(value),
            Cond::In(field, values) => doc
                .fields
                .get(field)
                .is_some_and(|v| values.iter().any(|c| c == v)),
            Cond::ElemMatch { array, elem, exists } => {
                let found = doc.array(array).iter().any(|e| elem.matches(e));
                found == *exists
            }
        }
    }
}

/// Selects whole documents: a conjunction of [`Cond`]s. An empty filter
/// selects every document of the collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocFilter {
    conds: Vec<Cond>,
}

impl DocFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(id: DocId) -> Self {
        Self::new().with(Cond::IdEq(id))
    }

    pub fn ids(ids: Vec<DocId>) -> Self {
        Self::new().with(Cond::IdIn(ids))
    }

    pub fn with(mut self, cond: Cond) -> Self {
        self.conds.push(cond);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Cond::Eq(field.into(), value.into()))
    }

    pub fn is_in<V: Into<Value>>(self, field: impl Into<String>, values: Vec<V>) -> Self {
        self.with(Cond::In(
            field.into(),
            values.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn elem_match(self, array: impl Into<String>, elem: ElemFilter) -> Self {
        self.with(Cond::ElemMatch {
            array: array.into(),
            elem,
            exists: true,
        })
    }

    pub fn no_elem_match(self, array: impl Into<String>, elem: ElemFilter) -> Self {
        self.with(Cond::ElemMatch {
            array: array.into(),
            elem,
            exists: false,
        })
    }

    pub fn conds(&self) -> &[Cond] {
        &self.conds
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conds.iter().all(|c| c.matches(doc))
    }
}

// ── Projection ──────────────────────────────────────────────────

/// Field projection. Entries are top-level names (`"link_id"`) or
/// `array.field` paths (`"signings.email"`) that keep only the listed
/// sub-fields of every array element. An empty projection keeps everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    paths: Vec<String>,
}

impl Projection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of(paths: &[&str]) -> Self {
        Self {
            paths: paths.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    /// Keeps no fields; only document ids are returned.
    pub fn ids_only() -> Self {
        Self::of(&["_id"])
    }

    /// Only the listed sub-fields of each element of `array`.
    pub fn array_fields(array: &str, fields: &[&str]) -> Self {
        Self {
            paths: fields.iter().map(|f| format!("{array}.{f}")).collect(),
        }
    }

    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn is_all(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn apply(&self, fields: &Fields) -> Fields {
        if self.is_all() {
            return fields.clone();
        }

        // None = keep the whole top-level value.
        let mut wanted: BTreeMap<&str, Option<BTreeSet<&str>>> = BTreeMap::new();
        for path in &self.paths {
            match path.split_once('.') {
                None => {
                    wanted.insert(path.as_str(), None);
                }
                Some((top, sub)) => {
                    let entry = wanted.entry(top).or_insert_with(|| Some(BTreeSet::new()));
                    if let Some(subs) = entry {
                        subs.insert(sub);
                    }
                }
            }
        }

        let mut out = Fields::new();
        for (top, subs) in wanted {
            let Some(value) = fields.get(top) else {
                continue;
            };
            let projected = match (subs, value) {
                (None, v) => v.clone(),
                (Some(subs), Value::Array(items)) => Value::Array(
                    items
                        .iter()
                        .map(|item| keep_keys(item, &subs))
                        .collect(),
                ),
                (Some(subs), v @ Value::Object(_)) => keep_keys(v, &subs),
                (Some(_), v) => v.clone(),
            };
            out.insert(top.to_string(), projected);
        }
        out
    }
}

fn keep_keys(value: &Value, keys: &BTreeSet<&str>) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .filter(|(k, _)| keys.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Restricts an embedded array to the elements matching `elem` in query
/// results.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayFilter {
    pub array: String,
    pub elem: ElemFilter,
}

impl ArrayFilter {
    pub fn new(array: impl Into<String>, elem: ElemFilter) -> Self {
        Self {
            array: array.into(),
            elem,
        }
    }

    /// Replace the array with its matching elements. A missing array becomes
    /// an empty one.
    pub fn apply(&self, fields: &mut Fields) {
        let kept: Vec<Value> = fields
            .get(&self.array)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|e| self.elem.matches(e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        fields.insert(self.array.clone(), Value::Array(kept));
    }
}

// ── Single-document update commands ─────────────────────────────

/// A mutation applied to exactly one matched document.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Append elements to an array, creating it when absent.
    Push { array: String, values: Vec<Value> },
    /// Remove every element matching `elem`.
    Pull { array: String, elem: ElemFilter },
    /// Set `fields` on every element matching `elem`.
    SetElem {
        array: String,
        elem: ElemFilter,
        fields: Fields,
    },
    /// Add `value` to the set held in `field` of every element matching
    /// `elem`.
    AddToElemSet {
        array: String,
        elem: ElemFilter,
        field: String,
        value: Value,
    },
    /// Set top-level fields.
    Set(Fields),
}

/// What an [`Update`] did to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    pub modified: bool,
    /// Elements removed by a [`Update::Pull`].
    pub removed: Vec<Value>,
}

impl Update {
    pub fn array(&self) -> Option<&str> {
        match self {
            Update::Push { array, .. }
            | Update::Pull { array, .. }
            | Update::SetElem { array, .. }
            | Update::AddToElemSet { array, .. } => Some(array),
            Update::Set(_) => None,
        }
    }

    /// Apply the command in place. Fails without touching the document when
    /// the target field exists but is not an array.
    pub fn apply(&self, doc: &mut Fields) -> Result<Applied, DbError> {
        if let Some(array) = self.array() {
            if let Some(v) = doc.get(array) {
                if !v.is_array() {
                    return Err(DbError::System(anyhow!(
                        "field {array} is a {}, not an array",
                        json_kind(v)
                    )));
                }
            }
        }

        match self {
            Update::Push { array, values } => {
                if values.is_empty() {
                    return Ok(Applied::default());
                }
                let items = array_mut(doc, array);
                items.extend(values.iter().cloned());
                Ok(Applied {
                    modified: true,
                    removed: vec![],
                })
            }
            Update::Pull { array, elem } => {
                let Some(Value::Array(items)) = doc.get_mut(array) else {
                    return Ok(Applied::default());
                };
                let (removed, kept): (Vec<Value>, Vec<Value>) =
                    items.drain(..).partition(|e| elem.matches(e));
                *items = kept;
                Ok(Applied {
                    modified: !removed.is_empty(),
                    removed,
                })
            }
            Update::SetElem {
                array,
                elem,
                fields,
            } => {
                let Some(Value::Array(items)) = doc.get_mut(array) else {
                    return Ok(Applied::default());
                };
                let mut modified = false;
                for item in items.iter_mut().filter(|e| elem.matches(e)) {
                    if let Value::Object(obj) = item {
                        for (k, v) in fields {
                            if obj.get(k) != Some(v) {
                                obj.insert(k.clone(), v.clone());
                                modified = true;
                            }
                        }
                    }
                }
                Ok(Applied {
                    modified,
                    removed: vec![],
                })
            }
            Update::AddToElemSet {
                array,
                elem,
                field,
                value,
            } => {
                let Some(Value::Array(items)) = doc.get_mut(array) else {
                    return Ok(Applied::default());
                };
                let mut modified = false;
                for item in items.iter_mut().filter(|e| elem.matches(e)) {
                    if let Value::Object(obj) = item {
                        let set = obj
                            .entry(field.clone())
                            .or_insert_with(|| Value::Array(vec![]));
                        if !set.is_array() {
                            *set = Value::Array(vec![]);
                        }
                        if let Value::Array(members) = set {
                            if !members.contains(value) {
                                members.push(value.clone());
                                modified = true;
                            }
                        }
                    }
                }
                Ok(Applied {
                    modified,
                    removed: vec![],
                })
            }
            Update::Set(fields) => {
                let mut modified = false;
                for (k, v) in fields {
                    if doc.get(k) != Some(v) {
                        doc.insert(k.clone(), v.clone());
                        modified = true;
                    }
                }
                Ok(Applied {
                    modified,
                    removed: vec![],
                })
            }
        }
    }
}

fn array_mut<'a>(doc: &'a mut Fields, array: &str) -> &'a mut Vec<Value> {
    let slot = doc
        .entry(array.to_string())
        .or_insert_with(|| Value::Array(vec![]));
    if !slot.is_array() {
        *slot = Value::Array(vec![]);
    }
    match slot {
        Value::Array(items) => items,
        _ => unreachable!("slot was just made an array"),
    }
}

/// Storage-engine counters of one `update_one` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub removed: Vec<Value>,
}

/// Storage-engine counters of one `replace_one` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaceOutcome {
    pub matched: u64,
    pub upserted: Option<DocId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        let Value::Object(fields) = value else {
            panic!("object expected")
        };
        Document::new(DocId::generate(), fields)
    }

    #[test]
    fn elem_filter_requires_every_field() {
        let f = ElemFilter::new().with("corp_id", "x.com").with("email", "a@x.com");
        assert!(f.matches(&json!({"corp_id": "x.com", "email": "a@x.com", "name": "A"})));
        assert!(!f.matches(&json!({"corp_id": "x.com", "email": "b@x.com"})));
        assert!(!f.matches(&json!("a@x.com")));
    }

    #[test]
    fn empty_elem_filter_matches_any_object() {
        assert!(ElemFilter::new().matches(&json!({})));
        assert!(!ElemFilter::new().matches(&json!(1)));
    }

    #[test]
    fn elem_match_on_missing_array() {
        let d = doc(json!({"link_id": "l1"}));
        let elem = ElemFilter::new().with("email", "a@x.com");
        assert!(!DocFilter::new().elem_match("signings", elem.clone()).matches(&d));
        assert!(DocFilter::new().no_elem_match("signings", elem).matches(&d));
    }

    #[test]
    fn in_condition_matches_any_candidate() {
        let d = doc(json!({"org_identity": "github/o"}));
        let f = DocFilter::new().is_in("org_identity", vec!["github/o", "github/o/r"]);
        assert!(f.matches(&d));
        let f = DocFilter::new().is_in("org_identity", vec!["github/o/r"]);
        assert!(!f.matches(&d));
    }

    #[test]
    fn projection_keeps_array_subfields() {
        let d = doc(json!({
            "link_id": "l1",
            "secret": "s",
            "signings": [{"email": "a@x.com", "name": "A", "signing_info": {"k": "v"}}]
        }));
        let p = Projection::of(&["link_id", "signings.email", "signings.name"]);
        let out = p.apply(&d.fields);
        assert_eq!(
            Value::Object(out),
            json!({"link_id": "l1", "signings": [{"email": "a@x.com", "name": "A"}]})
        );
    }

    #[test]
    fn array_filter_replaces_missing_array_with_empty() {
        let mut fields = doc(json!({"link_id": "l1"})).fields;
        ArrayFilter::new("signings", ElemFilter::new()).apply(&mut fields);
        assert_eq!(fields.get("signings"), Some(&json!([])));
    }

    #[test]
    fn set_elem_reports_unchanged_values() {
        let mut fields = doc(json!({"signings": [{"email": "a", "enabled": true}]})).fields;
        let mut set = Fields::new();
        set.insert("enabled".into(), json!(true));
        let update = Update::SetElem {
            array: "signings".into(),
            elem: ElemFilter::new().with("email", "a"),
            fields: set,
        };
        assert!(!update.apply(&mut fields).unwrap().modified);
    }

    #[test]
    fn pull_returns_removed_elements() {
        let mut fields = doc(json!({"managers": [{"email": "a"}, {"email": "b"}]})).fields;
        let applied = Update::Pull {
            array: "managers".into(),
            elem: ElemFilter::new().with("email", "a"),
        }
        .apply(&mut fields)
        .unwrap();
        assert!(applied.modified);
        assert_eq!(applied.removed, vec![json!({"email": "a"})]);
        assert_eq!(fields.get("managers"), Some(&json!([{"email": "b"}])));
    }

    #[test]
    fn add_to_elem_set_is_idempotent() {
        let mut fields = doc(json!({"signings": [{"corp_id": "x.com"}]})).fields;
        let update = Update::AddToElemSet {
            array: "signings".into(),
            elem: ElemFilter::new().with("corp_id", "x.com"),
            field: "domains".into(),
            value: json!("y.x.com"),
        };
        assert!(update.apply(&mut fields).unwrap().modified);
        assert!(!update.apply(&mut fields).unwrap().modified);
        assert_eq!(
            fields.get("signings"),
            Some(&json!([{"corp_id": "x.com", "domains": ["y.x.com"]}]))
        );
    }

    #[test]
    fn update_refuses_non_array_target() {
        let mut fields = doc(json!({"signings": "oops"})).fields;
        let err = Update::Push {
            array: "signings".into(),
            values: vec![json!({})],
        }
        .apply(&mut fields)
        .unwrap_err();
        assert!(matches!(err, DbError::System(_)));
        assert_eq!(fields.get("signings"), Some(&json!("oops")));
    }
}
