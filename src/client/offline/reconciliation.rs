//! # State Reconciliation
//!
//! Computes the view the UI renders by layering pending overlays over the
//! authoritative records. The view is derived on every read and never stored.

use super::optimistic::{OverlayEntry, OverlayKind};
use crate::shared::{EntityId, FieldMap, Record};
use serde::Serialize;
use std::collections::HashMap;

/// Confirmation state of a visible item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Matches the server
    Confirmed,
    /// Not yet known to the server
    PendingCreate,
    /// Server copy with unconfirmed edits on top
    PendingUpdate,
}

/// One item of the composed view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewItem {
    pub id: EntityId,
    pub fields: FieldMap,
    pub status: ItemStatus,
}

/// Merge authoritative records with the overlays of the same table
///
/// Records under a pending delete are hidden. Pending updates are merged
/// over the record they cover, or shown on their own when the record has
/// not been loaded. Pending creates follow in creation order.
pub fn compose_view<'a>(
    authoritative: &[Record],
    overlays: impl IntoIterator<Item = &'a OverlayEntry>,
) -> Vec<ViewItem> {
    let mut by_id: HashMap<&EntityId, &OverlayEntry> = HashMap::new();
    let mut creates = Vec::new();
    let mut orphan_updates = Vec::new();

    for entry in overlays {
        match (&entry.id, entry.kind) {
            (EntityId::LocalOnly(_), OverlayKind::PendingCreate) => creates.push(entry),
            (EntityId::LocalOnly(_), _) => {}
            (EntityId::Persisted(_), _) => {
                by_id.insert(&entry.id, entry);
            }
        }
    }

    let mut view = Vec::with_capacity(authoritative.len() + creates.len());
    let mut covered = Vec::new();

    for record in authoritative {
        let id = EntityId::Persisted(record.id.clone());
        match by_id.get(&id) {
            Some(entry) if entry.kind == OverlayKind::PendingDelete => {
                covered.push(id);
            }
            Some(entry) => {
                let mut fields = record.fields.clone();
                fields.extend(entry.fields.clone());
                covered.push(id.clone());
                view.push(ViewItem {
                    id,
                    fields,
                    status: ItemStatus::PendingUpdate,
                });
            }
            None => view.push(ViewItem {
                id,
                fields: record.fields.clone(),
                status: ItemStatus::Confirmed,
            }),
        }
    }

    for (id, entry) in &by_id {
        if entry.kind == OverlayKind::PendingUpdate && !covered.contains(*id) {
            orphan_updates.push(*entry);
        }
    }
    orphan_updates.sort_by_key(|entry| entry.seq);
    creates.sort_by_key(|entry| entry.seq);

    view.extend(orphan_updates.into_iter().chain(creates).map(|entry| ViewItem {
        id: entry.id.clone(),
        fields: entry.fields.clone(),
        status: match entry.kind {
            OverlayKind::PendingCreate => ItemStatus::PendingCreate,
            _ => ItemStatus::PendingUpdate,
        },
    }));

    view
}
