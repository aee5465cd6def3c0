//! Field-by-field comparison of two versions.

use std::collections::HashSet;

use arrels_core::{
  EntityKind, Snapshot,
  wiki::{DiffRow, FieldValue},
};

fn row(key: &str, label: &str, before: &str, after: &str) -> Option<DiffRow> {
  let (before, after) = (before.trim(), after.trim());
  if before.is_empty() && after.is_empty() {
    return None;
  }
  Some(DiffRow {
    key:     key.to_owned(),
    label:   label.to_owned(),
    before:  before.to_owned(),
    after:   after.to_owned(),
    changed: before != after,
  })
}

/// Pair fields by label, in `left`'s order followed by labels only `right`
/// has. Values compare after trimming; fields empty on both sides are left
/// out.
pub fn diff_fields(left: &[FieldValue], right: &[FieldValue]) -> Vec<DiffRow> {
  let mut seen = HashSet::new();
  let mut rows = Vec::new();
  for l in left {
    seen.insert(l.label.as_str());
    let after = right.iter().find(|r| r.label == l.label).map_or("", |r| r.value.as_str());
    rows.extend(row(&l.key, &l.label, &l.value, after));
  }
  for r in right.iter().filter(|r| !seen.contains(r.label.as_str())) {
    rows.extend(row(&r.key, &r.label, "", &r.value));
  }
  rows
}

pub fn diff_snapshots(kind: EntityKind, left: &Snapshot, right: &Snapshot) -> Vec<DiffRow> {
  diff_fields(&left.flatten(kind), &right.flatten(kind))
}

/// Whether any row differs.
pub fn has_changes(rows: &[DiffRow]) -> bool { rows.iter().any(|r| r.changed) }

#[cfg(test)]
mod tests {
  use super::*;

  fn fv(label: &str, value: &str) -> FieldValue {
    FieldValue { key: label.to_lowercase(), label: label.into(), value: value.into() }
  }

  #[test]
  fn pairs_by_label_and_trims() {
    let left = vec![fv("Nom", "Joan "), fv("Cognom", "Puig"), fv("Ofici", "")];
    let right = vec![fv("Cognom", "Puig i Serra"), fv("Nom", "Joan"), fv("Ofici", " ")];
    let rows = diff_fields(&left, &right);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].label, "Nom");
    assert!(!rows[0].changed);
    assert!(rows[1].changed);
    assert_eq!(rows[1].after, "Puig i Serra");
  }

  #[test]
  fn right_only_labels_are_appended() {
    let rows = diff_fields(&[fv("A", "1")], &[fv("A", "1"), fv("B", "2")]);
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[1].before.as_str(), rows[1].after.as_str()), ("", "2"));
    assert!(has_changes(&rows));
  }
}
