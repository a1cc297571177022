//! Time-series stores
//!
//! One `TsValue` tree backs each output. Every layer of the tree carries its
//! own `last_modified` stamp, so `modified`/`valid`/`delta_value` can be
//! answered at any depth.
//!
//! INVARIANT: `modified == (last_modified == evaluation_time)` and
//! `valid == (last_modified > EngineTime::MIN)` at every layer.
//!
//! Dict and Set stores coalesce intra-cycle churn against a cycle-start
//! baseline: a key added and removed (or removed and re-added) within one
//! cycle produces no externally visible delta.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{SeriesError, SeriesResult};
use crate::time::EngineTime;
use crate::value::{ElementPath, Key, PathSeg, Value};

/// Static shape of a time-series edge, resolved by the wiring stage.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Scalar,
    List { element: Box<Shape>, arity: usize },
    Bundle(Vec<(Arc<str>, Shape)>),
    Dict { element: Box<Shape> },
    Set,
}

impl Shape {
    pub fn list(element: Shape, arity: usize) -> Self {
        Shape::List {
            element: Box::new(element),
            arity,
        }
    }

    pub fn bundle(fields: &[(&str, Shape)]) -> Self {
        Shape::Bundle(
            fields
                .iter()
                .map(|(name, shape)| (Arc::from(*name), shape.clone()))
                .collect(),
        )
    }

    pub fn dict(element: Shape) -> Self {
        Shape::Dict {
            element: Box::new(element),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Shape::Scalar => "scalar",
            Shape::List { .. } => "list",
            Shape::Bundle(_) => "bundle",
            Shape::Dict { .. } => "dict",
            Shape::Set => "set",
        }
    }
}

/// Delta visible on an edge for one evaluation cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum Delta {
    Scalar(Value),
    List(BTreeMap<u32, Delta>),
    Bundle(BTreeMap<Arc<str>, Delta>),
    Dict(BTreeMap<Key, DictDeltaEntry>),
    Set {
        added: BTreeSet<Key>,
        removed: BTreeSet<Key>,
    },
}

/// Per-key dict delta: an update, or a tombstone marking removal.
#[derive(Clone, Debug, PartialEq)]
pub enum DictDeltaEntry {
    Updated(Delta),
    Removed,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        match self {
            Delta::Scalar(_) => false,
            Delta::List(entries) => entries.is_empty(),
            Delta::Bundle(entries) => entries.is_empty(),
            Delta::Dict(entries) => entries.is_empty(),
            Delta::Set { added, removed } => added.is_empty() && removed.is_empty(),
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Delta::Scalar(v) => Some(v),
            _ => None,
        }
    }
}

/// A time-series value tree. See module docs for the layer invariants.
#[derive(Clone, Debug)]
pub enum TsValue {
    Scalar(ScalarTs),
    List(ListTs),
    Bundle(BundleTs),
    Dict(DictTs),
    Set(SetTs),
}

#[derive(Clone, Debug)]
pub struct ScalarTs {
    value: Option<Value>,
    last_modified: EngineTime,
}

#[derive(Clone, Debug)]
pub struct ListTs {
    elements: Vec<TsValue>,
    last_modified: EngineTime,
}

#[derive(Clone, Debug)]
pub struct BundleTs {
    fields: Vec<(Arc<str>, TsValue)>,
    last_modified: EngineTime,
}

#[derive(Clone, Debug)]
pub struct DictTs {
    element: Shape,
    entries: HashMap<Key, TsValue>,
    /// Membership at the start of the cycle `delta_time` refers to.
    baseline: HashSet<Key>,
    delta_time: EngineTime,
    last_modified: EngineTime,
}

#[derive(Clone, Debug)]
pub struct SetTs {
    elements: HashSet<Key>,
    baseline: HashSet<Key>,
    delta_time: EngineTime,
    last_modified: EngineTime,
}

impl Default for ScalarTs {
    fn default() -> Self {
        ScalarTs {
            value: None,
            last_modified: EngineTime::MIN,
        }
    }
}

impl Default for SetTs {
    fn default() -> Self {
        SetTs {
            elements: HashSet::new(),
            baseline: HashSet::new(),
            delta_time: EngineTime::MIN,
            last_modified: EngineTime::MIN,
        }
    }
}

impl TsValue {
    pub fn new(shape: &Shape) -> Self {
        match shape {
            Shape::Scalar => TsValue::Scalar(ScalarTs::default()),
            Shape::List { element, arity } => TsValue::List(ListTs {
                elements: (0..*arity).map(|_| TsValue::new(element)).collect(),
                last_modified: EngineTime::MIN,
            }),
            Shape::Bundle(fields) => TsValue::Bundle(BundleTs {
                fields: fields
                    .iter()
                    .map(|(name, shape)| (name.clone(), TsValue::new(shape)))
                    .collect(),
                last_modified: EngineTime::MIN,
            }),
            Shape::Dict { element } => TsValue::Dict(DictTs {
                element: (**element).clone(),
                entries: HashMap::new(),
                baseline: HashSet::new(),
                delta_time: EngineTime::MIN,
                last_modified: EngineTime::MIN,
            }),
            Shape::Set => TsValue::Set(SetTs::default()),
        }
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            TsValue::Scalar(_) => "scalar",
            TsValue::List(_) => "list",
            TsValue::Bundle(_) => "bundle",
            TsValue::Dict(_) => "dict",
            TsValue::Set(_) => "set",
        }
    }

    pub fn last_modified(&self) -> EngineTime {
        match self {
            TsValue::Scalar(s) => s.last_modified,
            TsValue::List(l) => l.last_modified,
            TsValue::Bundle(b) => b.last_modified,
            TsValue::Dict(d) => d.last_modified,
            TsValue::Set(s) => s.last_modified,
        }
    }

    #[inline]
    pub fn modified(&self, at: EngineTime) -> bool {
        self.last_modified() == at
    }

    pub fn valid(&self) -> bool {
        match self {
            TsValue::Scalar(s) => s.last_modified > EngineTime::MIN,
            TsValue::List(l) => l.elements.iter().any(TsValue::valid),
            TsValue::Bundle(b) => b.fields.iter().any(|(_, f)| f.valid()),
            TsValue::Dict(d) => d.last_modified > EngineTime::MIN,
            TsValue::Set(s) => s.last_modified > EngineTime::MIN,
        }
    }

    /// Walk to the sub-value at `path`, if it exists.
    pub fn at_path(&self, path: &ElementPath) -> Option<&TsValue> {
        let mut cur = self;
        for seg in path.segments() {
            cur = match (cur, seg) {
                (TsValue::List(l), PathSeg::Index(i)) => l.elements.get(*i as usize)?,
                (TsValue::Bundle(b), PathSeg::Field(name)) => {
                    &b.fields.iter().find(|(n, _)| n == name)?.1
                }
                (TsValue::Dict(d), PathSeg::Key(key)) => d.entries.get(key)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Scalar payload, when this layer is a scalar.
    pub fn scalar(&self) -> Option<&Value> {
        match self {
            TsValue::Scalar(s) => s.value.as_ref(),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&DictTs> {
        match self {
            TsValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&SetTs> {
        match self {
            TsValue::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Set the scalar at `path`, creating dict entries along the way.
    /// Stamps `last_modified = at` on every layer of the walk.
    pub fn set_at_path(
        &mut self,
        path: &ElementPath,
        value: Value,
        at: EngineTime,
    ) -> SeriesResult<()> {
        self.apply_at_path(path.segments(), at, &mut |leaf| match leaf {
            TsValue::Scalar(s) => {
                s.value = Some(value.clone());
                s.last_modified = at;
                Ok(())
            }
            other => Err(SeriesError::ShapeMismatch {
                expected: "scalar",
                actual: other.shape_name(),
            }),
        })
    }

    /// Remove the dict entry addressed by the last segment of `path`.
    /// The removal is a tombstone in this cycle's delta unless the key was
    /// also added within the same cycle.
    pub fn remove_at_path(&mut self, path: &ElementPath, at: EngineTime) -> SeriesResult<()> {
        let (parent, last) = match path.segments().split_last() {
            Some((last, parent)) => (parent, last),
            None => {
                return Err(SeriesError::MissingElement {
                    path: format!("{path:?}"),
                })
            }
        };
        let key = match last {
            PathSeg::Key(k) => k.clone(),
            _ => {
                return Err(SeriesError::ShapeMismatch {
                    expected: "dict",
                    actual: "fixed-schema element",
                })
            }
        };
        self.apply_at_path(parent, at, &mut |container| match container {
            TsValue::Dict(d) => {
                d.roll(at);
                d.entries.remove(&key);
                d.last_modified = at;
                Ok(())
            }
            other => Err(SeriesError::ShapeMismatch {
                expected: "dict",
                actual: other.shape_name(),
            }),
        })
    }

    /// Insert an element into a set at `path`.
    pub fn set_insert(&mut self, path: &ElementPath, elem: Key, at: EngineTime) -> SeriesResult<()> {
        self.apply_at_path(path.segments(), at, &mut |leaf| match leaf {
            TsValue::Set(s) => {
                s.roll(at);
                s.elements.insert(elem.clone());
                s.last_modified = at;
                Ok(())
            }
            other => Err(SeriesError::ShapeMismatch {
                expected: "set",
                actual: other.shape_name(),
            }),
        })
    }

    /// Remove an element from a set at `path`.
    pub fn set_remove(&mut self, path: &ElementPath, elem: &Key, at: EngineTime) -> SeriesResult<()> {
        self.apply_at_path(path.segments(), at, &mut |leaf| match leaf {
            TsValue::Set(s) => {
                s.roll(at);
                s.elements.remove(elem);
                s.last_modified = at;
                Ok(())
            }
            other => Err(SeriesError::ShapeMismatch {
                expected: "set",
                actual: other.shape_name(),
            }),
        })
    }

    /// Drop all state and return to the never-ticked condition. Consumers
    /// observe `valid() == false` afterwards.
    pub fn invalidate(&mut self) {
        match self {
            TsValue::Scalar(s) => *s = ScalarTs::default(),
            TsValue::List(l) => {
                for elem in &mut l.elements {
                    elem.invalidate();
                }
                l.last_modified = EngineTime::MIN;
            }
            TsValue::Bundle(b) => {
                for (_, field) in &mut b.fields {
                    field.invalidate();
                }
                b.last_modified = EngineTime::MIN;
            }
            TsValue::Dict(d) => {
                d.entries.clear();
                d.baseline.clear();
                d.delta_time = EngineTime::MIN;
                d.last_modified = EngineTime::MIN;
            }
            TsValue::Set(s) => *s = SetTs::default(),
        }
    }

    /// The externally visible delta for the cycle at `at`, or `None` when
    /// nothing is visible (including fully coalesced intra-cycle churn).
    pub fn delta(&self, at: EngineTime) -> Option<Delta> {
        if !self.modified(at) {
            return None;
        }
        let delta = match self {
            TsValue::Scalar(s) => Delta::Scalar(s.value.clone()?),
            TsValue::List(l) => Delta::List(
                l.elements
                    .iter()
                    .enumerate()
                    .filter_map(|(i, e)| Some((i as u32, e.delta(at)?)))
                    .collect(),
            ),
            TsValue::Bundle(b) => Delta::Bundle(
                b.fields
                    .iter()
                    .filter_map(|(name, f)| Some((name.clone(), f.delta(at)?)))
                    .collect(),
            ),
            TsValue::Dict(d) => {
                let mut entries = BTreeMap::new();
                if d.delta_time == at {
                    for key in d.removed(at) {
                        entries.insert(key, DictDeltaEntry::Removed);
                    }
                }
                for (key, entry) in &d.entries {
                    if let Some(child) = entry.delta(at) {
                        entries.insert(key.clone(), DictDeltaEntry::Updated(child));
                    }
                }
                Delta::Dict(entries)
            }
            TsValue::Set(s) => Delta::Set {
                added: s.added(at).into_iter().collect(),
                removed: s.removed(at).into_iter().collect(),
            },
        };
        if delta.is_empty() {
            None
        } else {
            Some(delta)
        }
    }

    fn apply_at_path(
        &mut self,
        segs: &[PathSeg],
        at: EngineTime,
        apply: &mut dyn FnMut(&mut TsValue) -> SeriesResult<()>,
    ) -> SeriesResult<()> {
        let Some((seg, rest)) = segs.split_first() else {
            return apply(self);
        };
        match (&mut *self, seg) {
            (TsValue::List(l), PathSeg::Index(i)) => {
                let arity = l.elements.len();
                let elem = l
                    .elements
                    .get_mut(*i as usize)
                    .ok_or(SeriesError::IndexOutOfRange {
                        arity,
                        index: *i as usize,
                    })?;
                elem.apply_at_path(rest, at, apply)?;
                l.last_modified = at;
            }
            (TsValue::Bundle(b), PathSeg::Field(name)) => {
                let field = b
                    .fields
                    .iter_mut()
                    .find(|(n, _)| n == name)
                    .map(|(_, f)| f)
                    .ok_or_else(|| SeriesError::UnknownField {
                        field: name.to_string(),
                    })?;
                field.apply_at_path(rest, at, apply)?;
                b.last_modified = at;
            }
            (TsValue::Dict(d), PathSeg::Key(key)) => {
                d.roll(at);
                let element = d.element.clone();
                let entry = d
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| TsValue::new(&element));
                entry.apply_at_path(rest, at, apply)?;
                d.last_modified = at;
            }
            (other, seg) => {
                return Err(SeriesError::MissingElement {
                    path: format!("{seg:?} in {}", other.shape_name()),
                })
            }
        }
        Ok(())
    }
}

impl DictTs {
    /// Commit the baseline when the first mutation of a new cycle arrives.
    fn roll(&mut self, at: EngineTime) {
        if self.delta_time != at {
            self.baseline = self.entries.keys().cloned().collect();
            self.delta_time = at;
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &Key) -> Option<&TsValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &TsValue)> {
        self.entries.iter()
    }

    /// Keys that joined during the cycle `at`, net of intra-cycle churn.
    pub fn added(&self, at: EngineTime) -> Vec<Key> {
        if self.delta_time != at {
            return Vec::new();
        }
        self.entries
            .keys()
            .filter(|k| !self.baseline.contains(*k))
            .cloned()
            .collect()
    }

    /// Keys that left during the cycle `at`, net of intra-cycle churn.
    pub fn removed(&self, at: EngineTime) -> Vec<Key> {
        if self.delta_time != at {
            return Vec::new();
        }
        self.baseline
            .iter()
            .filter(|k| !self.entries.contains_key(*k))
            .cloned()
            .collect()
    }

    /// Keys present before and after the cycle `at` whose value re-ticked.
    pub fn modified_keys(&self, at: EngineTime) -> Vec<Key> {
        self.entries
            .iter()
            .filter(|(k, v)| v.modified(at) && (self.delta_time != at || self.baseline.contains(*k)))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

impl SetTs {
    fn roll(&mut self, at: EngineTime) {
        if self.delta_time != at {
            self.baseline = self.elements.clone();
            self.delta_time = at;
        }
    }

    pub fn contains(&self, elem: &Key) -> bool {
        self.elements.contains(elem)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn elements(&self) -> &HashSet<Key> {
        &self.elements
    }

    pub fn added(&self, at: EngineTime) -> Vec<Key> {
        if self.delta_time != at {
            return Vec::new();
        }
        self.elements
            .iter()
            .filter(|e| !self.baseline.contains(*e))
            .cloned()
            .collect()
    }

    pub fn removed(&self, at: EngineTime) -> Vec<Key> {
        if self.delta_time != at {
            return Vec::new();
        }
        self.baseline
            .iter()
            .filter(|e| !self.elements.contains(*e))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(ms: i64) -> EngineTime {
        EngineTime::from_millis(ms)
    }

    fn scalar_dict() -> TsValue {
        TsValue::new(&Shape::dict(Shape::Scalar))
    }

    #[test]
    fn test_scalar_modified_and_valid() {
        let mut ts = TsValue::new(&Shape::Scalar);
        assert!(!ts.valid());

        ts.set_at_path(&ElementPath::root(), Value::Float(1.5), t(1))
            .unwrap();
        assert!(ts.valid());
        assert!(ts.modified(t(1)));
        assert!(!ts.modified(t(2)));
        assert_eq!(ts.scalar(), Some(&Value::Float(1.5)));
    }

    #[test]
    fn test_bundle_stamps_parent_layers() {
        let shape = Shape::bundle(&[("bid", Shape::Scalar), ("ask", Shape::Scalar)]);
        let mut ts = TsValue::new(&shape);

        ts.set_at_path(&ElementPath::field("bid"), Value::Float(99.0), t(5))
            .unwrap();

        assert!(ts.modified(t(5)));
        assert!(ts.at_path(&ElementPath::field("bid")).unwrap().modified(t(5)));
        assert!(!ts.at_path(&ElementPath::field("ask")).unwrap().modified(t(5)));

        let delta = ts.delta(t(5)).unwrap();
        match delta {
            Delta::Bundle(entries) => {
                assert_eq!(entries.len(), 1);
                assert!(entries.contains_key(&Arc::from("bid")));
            }
            other => panic!("expected bundle delta, got {other:?}"),
        }
    }

    #[test]
    fn test_dict_add_then_remove_coalesces() {
        let mut ts = scalar_dict();
        let key = Key::str("a");

        ts.set_at_path(&ElementPath::key(key.clone()), Value::Int(1), t(1))
            .unwrap();
        ts.remove_at_path(&ElementPath::key(key.clone()), t(1)).unwrap();

        let dict = ts.as_dict().unwrap();
        assert!(!dict.contains(&key));
        assert!(dict.added(t(1)).is_empty());
        assert!(dict.removed(t(1)).is_empty());
        assert_eq!(ts.delta(t(1)), None);
    }

    #[test]
    fn test_dict_remove_then_re_add_is_not_added() {
        let mut ts = scalar_dict();
        let key = Key::str("a");

        // Cycle 1 establishes the key.
        ts.set_at_path(&ElementPath::key(key.clone()), Value::Int(1), t(1))
            .unwrap();

        // Cycle 2: remove then re-add. The key was present at cycle start,
        // so it is neither added nor removed, only modified.
        ts.remove_at_path(&ElementPath::key(key.clone()), t(2)).unwrap();
        ts.set_at_path(&ElementPath::key(key.clone()), Value::Int(2), t(2))
            .unwrap();

        let dict = ts.as_dict().unwrap();
        assert!(dict.added(t(2)).is_empty());
        assert!(dict.removed(t(2)).is_empty());
        assert_eq!(dict.modified_keys(t(2)), vec![key.clone()]);
    }

    #[test]
    fn test_dict_removal_is_a_tombstone() {
        let mut ts = scalar_dict();
        let key = Key::str("a");

        ts.set_at_path(&ElementPath::key(key.clone()), Value::Int(1), t(1))
            .unwrap();
        ts.remove_at_path(&ElementPath::key(key.clone()), t(2)).unwrap();

        match ts.delta(t(2)).unwrap() {
            Delta::Dict(entries) => {
                assert_eq!(entries.get(&key), Some(&DictDeltaEntry::Removed));
            }
            other => panic!("expected dict delta, got {other:?}"),
        }
    }

    #[test]
    fn test_set_coalescing() {
        let mut ts = TsValue::new(&Shape::Set);
        let elem = Key::Int(7);

        ts.set_insert(&ElementPath::root(), elem.clone(), t(1)).unwrap();
        ts.set_remove(&ElementPath::root(), &elem, t(1)).unwrap();

        let set = ts.as_set().unwrap();
        assert!(set.added(t(1)).is_empty());
        assert!(set.removed(t(1)).is_empty());
        assert_eq!(ts.delta(t(1)), None);
    }

    #[test]
    fn test_list_valid_if_any_element_valid() {
        let mut ts = TsValue::new(&Shape::list(Shape::Scalar, 3));
        assert!(!ts.valid());

        ts.set_at_path(&ElementPath::index(1), Value::Int(42), t(1))
            .unwrap();
        assert!(ts.valid());

        match ts.delta(t(1)).unwrap() {
            Delta::List(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[&1].as_scalar(), Some(&Value::Int(42)));
            }
            other => panic!("expected list delta, got {other:?}"),
        }
    }

    #[test]
    fn test_invalidate_returns_to_never_ticked() {
        let mut ts = TsValue::new(&Shape::Scalar);
        ts.set_at_path(&ElementPath::root(), Value::Int(1), t(1)).unwrap();
        ts.invalidate();
        assert!(!ts.valid());
        assert_eq!(ts.scalar(), None);
        assert_eq!(ts.last_modified(), EngineTime::MIN);
    }

    #[test]
    fn test_fixed_schema_rejects_unknown_field() {
        let shape = Shape::bundle(&[("x", Shape::Scalar)]);
        let mut ts = TsValue::new(&shape);
        let err = ts
            .set_at_path(&ElementPath::field("y"), Value::Int(1), t(1))
            .unwrap_err();
        assert!(matches!(err, SeriesError::UnknownField { .. }));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Op {
            Insert(u8),
            Remove(u8),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..4).prop_map(Op::Insert),
                (0u8..4).prop_map(Op::Remove),
            ]
        }

        proptest! {
            /// The visible dict delta must equal the set difference between
            /// cycle-start membership and cycle-end membership, regardless of
            /// the order or amount of intra-cycle churn.
            #[test]
            fn dict_delta_matches_membership_difference(
                seed in proptest::collection::vec(0u8..4, 0..4),
                ops in proptest::collection::vec(op_strategy(), 0..16),
            ) {
                let mut ts = scalar_dict();
                for k in &seed {
                    ts.set_at_path(&ElementPath::key(Key::Int(*k as i64)), Value::Int(0), t(1))
                        .unwrap();
                }
                let before: HashSet<Key> =
                    ts.as_dict().unwrap().keys().cloned().collect();

                for op in &ops {
                    match op {
                        Op::Insert(k) => ts
                            .set_at_path(
                                &ElementPath::key(Key::Int(*k as i64)),
                                Value::Int(1),
                                t(2),
                            )
                            .unwrap(),
                        Op::Remove(k) => {
                            let key = Key::Int(*k as i64);
                            if ts.as_dict().unwrap().contains(&key) {
                                ts.remove_at_path(&ElementPath::key(key), t(2)).unwrap();
                            }
                        }
                    }
                }

                let after: HashSet<Key> =
                    ts.as_dict().unwrap().keys().cloned().collect();
                let dict = ts.as_dict().unwrap();

                let added: HashSet<Key> = dict.added(t(2)).into_iter().collect();
                let removed: HashSet<Key> = dict.removed(t(2)).into_iter().collect();

                let expect_added: HashSet<Key> =
                    after.difference(&before).cloned().collect();
                let expect_removed: HashSet<Key> =
                    before.difference(&after).cloned().collect();

                prop_assert_eq!(added, expect_added);
                prop_assert_eq!(removed, expect_removed);
            }
        }
    }
}
