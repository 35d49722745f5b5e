//! Object operations in program order, truncated on backtrack.

use std::collections::HashSet;

use symlab_ir::{EntityId, ObjectOp, SymValue};

#[derive(Debug, Clone, Default)]
pub struct OpLog {
    ops: Vec<ObjectOp>,
}

impl OpLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: ObjectOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.ops.truncate(len);
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ObjectOp> {
        self.ops.iter()
    }

    /// Operations acting on any of `ids`, with their log positions.
    pub fn ops_for_any<'a>(
        &'a self,
        ids: &'a HashSet<EntityId>,
    ) -> impl Iterator<Item = (usize, &'a ObjectOp)> + 'a {
        self.ops
            .iter()
            .enumerate()
            .filter(move |(_, op)| op.target().is_some_and(|t| ids.contains(&t)))
    }

    /// `Remember` markers as `(position, name, value)`, oldest first.
    pub fn markers(&self) -> impl Iterator<Item = (usize, &str, &SymValue)> {
        self.ops.iter().enumerate().filter_map(|(pos, op)| match op {
            ObjectOp::Remember { name, value } => Some((pos, name.as_str(), value)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symlab_ir::NumExpr;

    fn store(array: u32, index: i64) -> ObjectOp {
        ObjectOp::Store {
            array: EntityId(array),
            index: NumExpr::int(index),
            value: SymValue::int(1),
        }
    }

    #[test]
    fn ops_are_filtered_by_target() {
        let mut log = OpLog::new();
        log.push(store(0, 0));
        log.push(store(1, 0));
        log.push(ObjectOp::Remember {
            name: "a".into(),
            value: SymValue::Entity(EntityId(0)),
        });
        log.push(store(0, 1));
        log.push(store(2, 0));
        let ids: HashSet<EntityId> = [EntityId(0), EntityId(2)].into_iter().collect();
        let positions: Vec<usize> = log.ops_for_any(&ids).map(|(p, _)| p).collect();
        assert_eq!(positions, vec![0, 3, 4]);
    }

    #[test]
    fn markers_follow_truncation() {
        let mut log = OpLog::new();
        for _ in 0..2 {
            log.push(ObjectOp::Remember {
                name: "snap".into(),
                value: SymValue::Null,
            });
            log.push(store(0, 0));
        }
        let positions: Vec<usize> = log.markers().map(|(pos, _, _)| pos).collect();
        assert_eq!(positions, vec![0, 2]);
        log.truncate(1);
        assert_eq!(log.markers().count(), 1);
        assert_eq!(log.iter().count(), 1);
    }
}
