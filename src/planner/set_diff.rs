//! Set diff for attachable sub-resources.
//!
//! Given the disks or IPs currently attached to a VM and the ones that
//! should be, computes which to detach and which to attach. Identity is the
//! stable ID only; names never participate.

use serde::Serialize;

use crate::hosting::{Disk, IpAddress};

/// A resource with a stable identity.
pub trait Identified {
    /// Returns the stable identifier.
    fn id(&self) -> &str;
}

impl Identified for Disk {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for IpAddress {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for String {
    fn id(&self) -> &str {
        self
    }
}

/// Result of diffing two attachment collections.
///
/// `to_detach` follows the order of the old collection and `to_attach` the
/// order of the new one. Both are always present, possibly empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetDiff<T> {
    /// Present in old, absent in new.
    pub to_detach: Vec<T>,
    /// Present in new, absent in old.
    pub to_attach: Vec<T>,
}

impl<T> SetDiff<T> {
    /// Returns true if nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_detach.is_empty() && self.to_attach.is_empty()
    }
}

/// Diffs two ordered collections by ID.
///
/// Each element of `old` consumes the first unconsumed element of `new`
/// with the same ID. Unmatched old elements are detached; whatever is left
/// of `new`, in its original order, is attached.
#[must_use]
pub fn diff<T: Identified>(old: Vec<T>, new: Vec<T>) -> SetDiff<T> {
    let mut remaining: Vec<Option<T>> = new.into_iter().map(Some).collect();
    let mut to_detach = Vec::new();

    for item in old {
        let matched = remaining
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|n| n.id() == item.id()));
        match matched {
            Some(slot) => {
                slot.take();
            }
            None => to_detach.push(item),
        }
    }

    SetDiff {
        to_detach,
        to_attach: remaining.into_iter().flatten().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosting::IpVersion;

    fn ip(id: &str) -> IpAddress {
        IpAddress {
            id: id.to_string(),
            ip: format!("192.0.2.{id}"),
            version: IpVersion::V4,
            region_id: "1".to_string(),
            vm_id: None,
            vlan_id: None,
            state: "created".to_string(),
        }
    }

    fn ips(ids: &[&str]) -> Vec<IpAddress> {
        ids.iter().map(|id| ip(id)).collect()
    }

    fn ids(items: &[IpAddress]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_detach_everything() {
        let result = diff(ips(&["1", "2"]), Vec::new());
        assert_eq!(ids(&result.to_detach), vec!["1", "2"]);
        assert!(result.to_attach.is_empty());
    }

    #[test]
    fn test_attach_one_more() {
        let result = diff(ips(&["1", "2"]), ips(&["1", "2", "3"]));
        assert!(result.to_detach.is_empty());
        assert_eq!(ids(&result.to_attach), vec!["3"]);
    }

    #[test]
    fn test_replace_all() {
        let result = diff(ips(&["1", "2"]), ips(&["3", "4"]));
        assert_eq!(ids(&result.to_detach), vec!["1", "2"]);
        assert_eq!(ids(&result.to_attach), vec!["3", "4"]);
    }

    #[test]
    fn test_identical_sets_are_noop() {
        let result = diff(ips(&["5", "6", "7"]), ips(&["5", "6", "7"]));
        assert!(result.is_empty());
        assert_eq!(result.to_attach, Vec::<IpAddress>::new());
    }

    #[test]
    fn test_empty_old_attaches_all_in_order() {
        let result = diff(Vec::new(), ips(&["9", "3", "4"]));
        assert!(result.to_detach.is_empty());
        assert_eq!(ids(&result.to_attach), vec!["9", "3", "4"]);
    }

    #[test]
    fn test_reordering_is_not_a_change() {
        let result = diff(ips(&["1", "2", "3"]), ips(&["3", "1", "2"]));
        assert!(result.is_empty());
    }

    #[test]
    fn test_identity_ignores_other_fields() {
        let mut renamed = ip("1");
        renamed.ip = "198.51.100.1".to_string();
        let result = diff(vec![ip("1")], vec![renamed]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_every_element_accounted_once() {
        let old = vec!["a", "b", "c", "d"];
        let new = vec!["c", "e", "a", "f"];
        let result = diff(
            old.iter().map(ToString::to_string).collect(),
            new.iter().map(ToString::to_string).collect(),
        );

        assert_eq!(result.to_detach, vec!["b".to_string(), "d".to_string()]);
        assert_eq!(result.to_attach, vec!["e".to_string(), "f".to_string()]);
        for id in &result.to_detach {
            assert!(!result.to_attach.contains(id));
        }
        let kept = old.len() - result.to_detach.len();
        assert_eq!(kept + result.to_attach.len(), new.len());
    }

    #[test]
    fn test_duplicate_ids_match_first_unconsumed() {
        let result = diff(
            vec!["x".to_string(), "x".to_string()],
            vec!["x".to_string()],
        );
        assert_eq!(result.to_detach, vec!["x".to_string()]);
        assert!(result.to_attach.is_empty());
    }
}
