//! Concrete counterparts of search-space values.

use std::collections::HashSet;
use std::fmt::Write as _;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use symlab_ir::{ScalarKind, SymValue, ValueType};

/// Index of a cell in a [`LabelHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeapRef(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Null,
    Bool(bool),
    Int { kind: ScalarKind, value: i64 },
    Ref(HeapRef),
}

impl Label {
    pub fn int(value: i64) -> Self {
        Label::Int {
            kind: ScalarKind::Int,
            value,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Label::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Label::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_heap_ref(&self) -> Option<HeapRef> {
        match self {
            Label::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Label of an uninitialized slot of type `ty`.
    pub fn default_for(ty: &ValueType) -> Self {
        match ty {
            ValueType::Scalar(ScalarKind::Bool) => Label::Bool(false),
            ValueType::Scalar(kind) => Label::Int {
                kind: *kind,
                value: 0,
            },
            ValueType::Array(_) | ValueType::Object(_) => Label::Null,
        }
    }
}

/// A concrete array or object. `ident` is the labeled program identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeapCell {
    Array {
        ident: i64,
        elem: ValueType,
        items: Vec<Label>,
    },
    Object {
        ident: i64,
        class: String,
        fields: IndexMap<String, Label>,
    },
}

impl HeapCell {
    pub fn ident(&self) -> i64 {
        match self {
            HeapCell::Array { ident, .. } | HeapCell::Object { ident, .. } => *ident,
        }
    }
}

/// Concrete object graph; cells may share and cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelHeap {
    cells: Vec<HeapCell>,
}

impl LabelHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, cell: HeapCell) -> HeapRef {
        self.cells.push(cell);
        HeapRef(self.cells.len() - 1)
    }

    pub fn get(&self, r: HeapRef) -> Option<&HeapCell> {
        self.cells.get(r.0)
    }

    pub fn get_mut(&mut self, r: HeapRef) -> Option<&mut HeapCell> {
        self.cells.get_mut(r.0)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Human-readable rendering, e.g. `[7, 9, 0]` or `Point{x: 1, y: 2}`.
    /// A cell reached again while it is being printed renders as `@n`.
    pub fn render(&self, label: &Label) -> String {
        let mut out = String::new();
        self.render_into(label, &mut HashSet::new(), &mut out);
        out
    }

    fn render_into(&self, label: &Label, open: &mut HashSet<usize>, out: &mut String) {
        match label {
            Label::Null => out.push_str("null"),
            Label::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            Label::Int { value, .. } => {
                let _ = write!(out, "{value}");
            }
            Label::Ref(r) => {
                let Some(cell) = self.get(*r) else {
                    let _ = write!(out, "<dangling @{}>", r.0);
                    return;
                };
                if !open.insert(r.0) {
                    let _ = write!(out, "@{}", r.0);
                    return;
                }
                match cell {
                    HeapCell::Array { items, .. } => {
                        out.push('[');
                        for (i, item) in items.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            self.render_into(item, open, out);
                        }
                        out.push(']');
                    }
                    HeapCell::Object { class, fields, .. } => {
                        out.push_str(class);
                        out.push('{');
                        for (i, (name, value)) in fields.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            out.push_str(name);
                            out.push_str(": ");
                            self.render_into(value, open, out);
                        }
                        out.push('}');
                    }
                }
                open.remove(&r.0);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledValue {
    pub value: SymValue,
    pub label: Label,
    /// Log position of the `Remember` marker for snapshot values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<usize>,
}

/// Named values with their labels, sharing one heap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    entries: IndexMap<String, LabeledValue>,
    heap: LabelHeap,
}

impl Labels {
    pub fn new(entries: IndexMap<String, LabeledValue>, heap: LabelHeap) -> Self {
        Self { entries, heap }
    }

    pub fn get(&self, name: &str) -> Option<&LabeledValue> {
        self.entries.get(name)
    }

    pub fn label(&self, name: &str) -> Option<&Label> {
        self.entries.get(name).map(|lv| &lv.label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LabeledValue)> {
        self.entries.iter().map(|(n, lv)| (n.as_str(), lv))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn heap(&self) -> &LabelHeap {
        &self.heap
    }

    pub fn render(&self, name: &str) -> Option<String> {
        self.label(name).map(|l| self.heap.render(l))
    }

    /// Name-ordered renderings; two labelings are the same iff their
    /// fingerprints are.
    pub fn fingerprint(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|(n, lv)| (n.clone(), self.heap.render(&lv.label)))
            .collect();
        out.sort();
        out
    }
}

/// One labeled execution: the returned value plus every named value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub returned: LabeledValue,
    pub labels: Labels,
}

impl Solution {
    pub fn render_returned(&self) -> String {
        self.labels.heap().render(&self.returned.label)
    }
}
