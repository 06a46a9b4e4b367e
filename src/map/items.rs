use std::path::Path;

use serde::Serialize;

use super::{
    super::types::MapId,
    warnings::{EntityKind, Warning},
    MapError,
};

/// An entity that nominally carries a unique non-negative id and can be
/// resolved into an [ItemTable] by [sort_items].
pub trait MapItem {
    const KIND: EntityKind;

    fn id(&self) -> MapId;

    fn set_id(&mut self, id: MapId);

    /// The file the entity was read from, when the loader knows one.
    fn file(&self) -> Option<&Path> {
        None
    }
}

/// What a missing or negative declared id means. The call sites of
/// [sort_items] disagree on this, so it is an explicit parameter instead
/// of a global flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingIdPolicy {
    /// The entity is defective; park it under a synthetic negative id and
    /// warn about it
    Conflict,
    /// The id was deliberately left out; allocate the next free positive
    /// id silently
    AutoAssign,
}

/// A dense id-indexed array of entities.
///
/// Layout invariant: defective entries sit at the head under synthetic
/// negative ids `bad_id+1 ..= -1` (most negative first), valid ids `0..`
/// follow at indices >= [Self::bad_count]. Id 0 is the reserved sentinel
/// slot and is normally empty. `bad_id` itself is the next unallocated
/// synthetic id.
#[derive(Debug, Clone, Serialize)]
pub struct ItemTable<T> {
    items: Vec<Option<T>>,
    bad_id: MapId,
}

impl<T> ItemTable<T> {
    /// The next unallocated synthetic id; valid ids start at
    /// `bad_id + 1 + bad_count`, i.e. 0.
    pub fn bad_id(&self) -> MapId {
        self.bad_id
    }

    /// How many defective entries sit at the head of the array.
    pub fn bad_count(&self) -> usize {
        (-self.bad_id - 1) as usize
    }

    /// The number of valid id slots (sentinel included): `max_id + 1`.
    pub fn count(&self) -> usize {
        self.items.len() - self.bad_count()
    }

    /// The full array length, defective entries included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_id(&self) -> MapId {
        self.count() as MapId - 1
    }

    fn index_of(&self, id: MapId) -> Option<usize> {
        let idx = id as i64 - (self.bad_id as i64 + 1);
        if idx < 0 {
            None
        } else {
            Some(idx as usize)
        }
    }

    pub fn get(&self, id: MapId) -> Option<&T> {
        self.items.get(self.index_of(id)?)?.as_ref()
    }

    pub fn get_mut(&mut self, id: MapId) -> Option<&mut T> {
        let idx = self.index_of(id)?;
        self.items.get_mut(idx)?.as_mut()
    }

    /// Every id the table has a slot for, lowest (most negative) first.
    pub fn ids(&self) -> impl Iterator<Item = MapId> + '_ {
        let first = self.bad_id + 1;
        (0..self.items.len() as MapId).map(move |i| first + i)
    }

    /// Entities under valid (non-negative) ids, ascending.
    pub fn iter_valid(&self) -> impl Iterator<Item = &T> {
        self.items
            .iter()
            .skip(self.bad_count())
            .filter_map(|i| i.as_ref())
    }

    /// Every held entity, defective ones included, ascending by id.
    pub fn iter_all(&self) -> impl Iterator<Item = &T> {
        self.items.iter().filter_map(|i| i.as_ref())
    }

    /// Maps every entity into another type, preserving the id layout.
    /// Used to turn a resolved definition table into the final entity
    /// table without re-running conflict resolution.
    pub fn map_items<U, F: FnMut(T) -> U>(self, mut f: F) -> ItemTable<U> {
        ItemTable {
            items: self
                .items
                .into_iter()
                .map(|slot| slot.map(&mut f))
                .collect(),
            bad_id: self.bad_id,
        }
    }
}

/// Resolves a list of entities into a dense [ItemTable].
///
/// An id above `ceiling` aborts the load. A duplicate id keeps the first
/// occupant and relocates the later entry to a freshly allocated negative
/// id. Missing or negative ids follow `policy`. Ids absent from the input
/// produce one warning per contiguous missing range, not one per id.
pub fn sort_items<T: MapItem>(
    items: Vec<T>,
    ceiling: MapId,
    policy: MissingIdPolicy,
    warnings: &mut Vec<Warning>,
) -> Result<ItemTable<T>, MapError> {
    let kind = T::KIND;
    for item in &items {
        if item.id() > ceiling {
            return Err(MapError::IdCeiling {
                kind,
                id: item.id(),
                ceiling,
            });
        }
    }
    let max_id = items.iter().map(|i| i.id()).max().unwrap_or(0).max(0);
    let mut valid: Vec<Option<T>> = (0..=max_id).map(|_| None).collect();
    let mut bad: Vec<T> = Vec::new();
    let mut next_bad: MapId = -1;
    let mut next_auto = max_id + 1;
    for mut item in items {
        let id = item.id();
        if id < 0 {
            match policy {
                MissingIdPolicy::AutoAssign => {
                    item.set_id(next_auto);
                    valid.push(Some(item));
                    next_auto += 1;
                }
                MissingIdPolicy::Conflict => {
                    let mut warning = Warning::new(format!(
                        "a {} has no valid id and was stored under synthetic id {}",
                        kind, next_bad
                    ))
                    .source(kind.source(next_bad));
                    if let Some(file) = item.file() {
                        warning = warning.file(file);
                    }
                    warnings.push(warning);
                    item.set_id(next_bad);
                    bad.push(item);
                    next_bad -= 1;
                }
            }
        } else if valid[id as usize].is_some() {
            let mut warning = Warning::new(format!(
                "{} {} is defined more than once; the later entry was moved to synthetic id {}",
                kind, id, next_bad
            ))
            .source(kind.source(id));
            if let Some(file) = item.file() {
                warning = warning.file(file);
            }
            warnings.push(warning);
            item.set_id(next_bad);
            bad.push(item);
            next_bad -= 1;
        } else {
            valid[id as usize] = Some(item);
        }
    }
    // one warning per missing id run; the sentinel slot 0 is expected to
    // be empty and is never reported
    let mut run_start: Option<MapId> = None;
    for id in 1..valid.len() as MapId {
        let missing = valid[id as usize].is_none();
        if missing && run_start.is_none() {
            run_start = Some(id);
        }
        if let Some(start) = run_start {
            let run_ends = !missing || id == valid.len() as MapId - 1;
            if run_ends {
                let end = if missing { id } else { id - 1 };
                let text = if start == end {
                    format!("{} {} does not exist", kind, start)
                } else {
                    format!("{}s {} to {} do not exist", kind, start, end)
                };
                let mut warning = Warning::new(text).source(kind.source(start));
                if end != start {
                    warning = warning.source(kind.source(end));
                }
                warnings.push(warning);
                run_start = None;
            }
        }
    }
    let mut table_items: Vec<Option<T>> = bad.into_iter().rev().map(Some).collect();
    table_items.extend(valid);
    Ok(ItemTable {
        items: table_items,
        bad_id: next_bad,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct TestItem {
        id: MapId,
        tag: &'static str,
    }

    impl MapItem for TestItem {
        const KIND: EntityKind = EntityKind::Province;

        fn id(&self) -> MapId {
            self.id
        }

        fn set_id(&mut self, id: MapId) {
            self.id = id;
        }
    }

    fn item(id: MapId, tag: &'static str) -> TestItem {
        TestItem { id, tag }
    }

    #[test]
    fn test_duplicate_and_missing_range() {
        let mut warnings = Vec::new();
        let table = sort_items(
            vec![item(1, "first"), item(1, "second"), item(3, "third")],
            10,
            MissingIdPolicy::Conflict,
            &mut warnings,
        )
        .unwrap();
        // the first occupant keeps the id, the duplicate moves to -1
        assert_eq!(table.get(1).unwrap().tag, "first");
        assert_eq!(table.get(-1).unwrap().tag, "second");
        assert_eq!(table.bad_id(), -2);
        assert_eq!(table.bad_count(), 1);
        assert_eq!(table.count(), 4);
        assert_eq!(table.len(), 5);
        // one duplicate warning plus a single warning for the 2..=2 gap
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].text().contains("more than once"));
        assert!(warnings[1].text().contains("2 does not exist"));
    }

    #[test]
    fn test_ceiling_is_fatal() {
        let mut warnings = Vec::new();
        let res = sort_items(
            vec![item(11, "over")],
            10,
            MissingIdPolicy::Conflict,
            &mut warnings,
        );
        assert!(matches!(res, Err(MapError::IdCeiling { id: 11, .. })));
    }

    #[test]
    fn test_missing_run_is_one_warning() {
        let mut warnings = Vec::new();
        let table = sort_items(
            vec![item(1, "a"), item(5, "b")],
            10,
            MissingIdPolicy::Conflict,
            &mut warnings,
        )
        .unwrap();
        assert_eq!(table.count(), 6);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].text().contains("2 to 4"));
    }

    #[test]
    fn test_auto_assign() {
        let mut warnings = Vec::new();
        let table = sort_items(
            vec![item(1, "a"), item(-1, "auto")],
            10,
            MissingIdPolicy::AutoAssign,
            &mut warnings,
        )
        .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(table.get(2).unwrap().tag, "auto");
        assert_eq!(table.bad_count(), 0);
    }

    #[test]
    fn test_conflict_policy_parks_unassigned() {
        let mut warnings = Vec::new();
        let table = sort_items(
            vec![item(1, "a"), item(-1, "lost")],
            10,
            MissingIdPolicy::Conflict,
            &mut warnings,
        )
        .unwrap();
        assert_eq!(table.get(-1).unwrap().tag, "lost");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].text().contains("no valid id"));
    }

    #[test]
    fn test_empty_input_is_sentinel_only() {
        let mut warnings = Vec::new();
        let table =
            sort_items::<TestItem>(Vec::new(), 10, MissingIdPolicy::Conflict, &mut warnings)
                .unwrap();
        assert_eq!(table.count(), 1);
        assert_eq!(table.bad_count(), 0);
        assert_eq!(table.bad_id(), -1);
        assert!(table.get(0).is_none());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_id_indexing_with_bad_entries() {
        let mut warnings = Vec::new();
        let table = sort_items(
            vec![item(1, "a"), item(1, "b"), item(1, "c")],
            10,
            MissingIdPolicy::Conflict,
            &mut warnings,
        )
        .unwrap();
        assert_eq!(table.bad_count(), 2);
        // ids were allocated in order: "b" got -1, "c" got -2
        assert_eq!(table.get(-2).unwrap().tag, "c");
        assert_eq!(table.get(-1).unwrap().tag, "b");
        assert_eq!(table.get(1).unwrap().tag, "a");
        assert_eq!(table.ids().collect::<Vec<_>>(), vec![-2, -1, 0, 1]);
    }
}
