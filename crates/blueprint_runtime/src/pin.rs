// Pins - Typed data and flow slots on nodes
//
// Pins live in a graph-wide table keyed by id. Nodes keep the ids of the pins
// they own; links are stored as ids on both ends so every lookup goes through
// the table and a dangling id simply resolves to nothing.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use blueprint_types::{IdType, INVALID_ID, PinKind, PinType, PinValue};

// ─────────────────────────────────────────────────────────────────────────────
// Flow Pin Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a flow pin; the default handle points nowhere
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FlowPin(pub IdType);

impl FlowPin {
    pub const NONE: FlowPin = FlowPin(INVALID_ID);

    pub fn id(&self) -> IdType {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != INVALID_ID
    }
}

impl From<IdType> for FlowPin {
    fn from(id: IdType) -> Self {
        FlowPin(id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pin
// ─────────────────────────────────────────────────────────────────────────────

/// A pin on a node
#[derive(Debug, Clone)]
pub struct Pin {
    /// Unique id within the graph
    pub id: IdType,
    /// Owning node (back-reference)
    pub node: IdType,
    pub name: String,
    pub pin_type: PinType,
    pub kind: PinKind,
    /// Pin this one links to: the next flow input for a flow output, the
    /// provider output for a data input
    pub link: Option<IdType>,
    /// Pins linking to this one
    pub link_from: BTreeSet<IdType>,
    /// Literal value, used while the pin is unlinked
    pub value: PinValue,
    /// Extension type id for `Custom` pins
    pub ex_type: Option<IdType>,
}

impl Pin {
    pub fn new(id: IdType, node: IdType, name: impl Into<String>, pin_type: PinType, kind: PinKind) -> Self {
        Self {
            id,
            node,
            name: name.into(),
            pin_type,
            kind,
            link: None,
            link_from: BTreeSet::new(),
            value: PinValue::default_for(pin_type),
            ex_type: None,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    pub fn is_flow(&self) -> bool {
        self.pin_type.is_flow()
    }

    pub fn is_input(&self) -> bool {
        self.kind == PinKind::Input
    }

    pub fn is_output(&self) -> bool {
        self.kind == PinKind::Output
    }

    /// Store a literal, converted to the pin's type when possible
    pub fn set_value(&mut self, value: impl Into<PinValue>) {
        let value = value.into();
        self.value = value.convert_to(self.pin_type).unwrap_or(value);
    }

    pub fn value(&self) -> &PinValue {
        &self.value
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Link Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors when editing pins or links
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Pin {0} not found")]
    PinNotFound(IdType),

    #[error("Pin id {0} is already in use")]
    DuplicateId(IdType),

    #[error("Cannot link pins {0} and {1} of the same node")]
    SameNode(IdType, IdType),

    #[error("Cannot link pin {from} to pin {to}: wrong direction")]
    Direction { from: IdType, to: IdType },

    #[error("Cannot link {from_type} pin to {to_type} pin")]
    TypeMismatch { from_type: PinType, to_type: PinType },
}

// ─────────────────────────────────────────────────────────────────────────────
// Pin Table
// ─────────────────────────────────────────────────────────────────────────────

/// All pins of one graph, keyed by id
#[derive(Debug, Clone, Default)]
pub struct PinTable {
    pins: BTreeMap<IdType, Pin>,
}

impl PinTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pin; fails if the id is taken
    pub fn insert(&mut self, pin: Pin) -> Result<(), LinkError> {
        if self.pins.contains_key(&pin.id) {
            return Err(LinkError::DuplicateId(pin.id));
        }
        self.pins.insert(pin.id, pin);
        Ok(())
    }

    pub fn get(&self, id: IdType) -> Option<&Pin> {
        self.pins.get(&id)
    }

    pub fn get_mut(&mut self, id: IdType) -> Option<&mut Pin> {
        self.pins.get_mut(&id)
    }

    pub fn contains(&self, id: IdType) -> bool {
        self.pins.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pin> {
        self.pins.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = IdType> + '_ {
        self.pins.keys().copied()
    }

    pub fn clear(&mut self) {
        self.pins.clear();
    }

    /// Remove a pin, detaching every link that touches it
    pub fn remove(&mut self, id: IdType) -> Option<Pin> {
        self.detach(id);
        self.pins.remove(&id)
    }

    /// Literal value of a pin
    pub fn value(&self, id: IdType) -> Option<&PinValue> {
        self.pins.get(&id).map(|p| &p.value)
    }

    /// Set the literal value of a pin; false if the pin does not exist
    pub fn set_value(&mut self, id: IdType, value: impl Into<PinValue>) -> bool {
        match self.pins.get_mut(&id) {
            Some(pin) => {
                pin.set_value(value);
                true
            }
            None => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Links
    // ─────────────────────────────────────────────────────────────────────────

    /// Pin this pin links to, if linked and still alive
    pub fn link_target(&self, id: IdType) -> Option<&Pin> {
        self.pins
            .get(&id)
            .and_then(|p| p.link)
            .and_then(|target| self.pins.get(&target))
    }

    /// Check whether `from` may link to `to`
    pub fn can_link(&self, from: IdType, to: IdType) -> Result<(), LinkError> {
        let a = self.pins.get(&from).ok_or(LinkError::PinNotFound(from))?;
        let b = self.pins.get(&to).ok_or(LinkError::PinNotFound(to))?;

        if a.node == b.node {
            return Err(LinkError::SameNode(from, to));
        }
        if a.is_flow() != b.is_flow() || !a.pin_type.is_compatible_with(&b.pin_type) {
            return Err(LinkError::TypeMismatch {
                from_type: a.pin_type,
                to_type: b.pin_type,
            });
        }
        // Flow outputs point at the next flow input, data inputs at their provider
        let direction_ok = if a.is_flow() {
            a.is_output() && b.is_input()
        } else {
            a.is_input() && b.is_output()
        };
        if !direction_ok {
            return Err(LinkError::Direction { from, to });
        }
        Ok(())
    }

    /// Link `from` to `to`, replacing any link `from` already had
    pub fn link(&mut self, from: IdType, to: IdType) -> Result<(), LinkError> {
        self.can_link(from, to)?;
        self.unlink(from);
        if let Some(pin) = self.pins.get_mut(&from) {
            pin.link = Some(to);
        }
        if let Some(pin) = self.pins.get_mut(&to) {
            pin.link_from.insert(from);
        }
        Ok(())
    }

    /// Remove the outgoing link of `id`; returns the former target
    pub fn unlink(&mut self, id: IdType) -> Option<IdType> {
        let target = self.pins.get_mut(&id)?.link.take()?;
        if let Some(pin) = self.pins.get_mut(&target) {
            pin.link_from.remove(&id);
        }
        Some(target)
    }

    /// Remove the outgoing link and every incoming link of `id`
    pub fn detach(&mut self, id: IdType) {
        self.unlink(id);
        let sources = match self.pins.get_mut(&id) {
            Some(pin) => std::mem::take(&mut pin.link_from),
            None => return,
        };
        for source in sources {
            if let Some(pin) = self.pins.get_mut(&source) {
                if pin.link == Some(id) {
                    pin.link = None;
                }
            }
        }
    }

    /// Every pin whose link resolves to `id` (linear scan)
    pub fn find_pins_linked_to(&self, id: IdType) -> Vec<IdType> {
        self.pins
            .values()
            .filter(|p| p.link == Some(id) && self.pins.contains_key(&id))
            .map(|p| p.id)
            .collect()
    }

    /// Whether any link touches `id`, in either direction
    pub fn has_any_link(&self, id: IdType) -> bool {
        match self.pins.get(&id) {
            Some(pin) => self.link_target(id).is_some() || pin.link_from.iter().any(|s| self.pins.contains_key(s)),
            None => false,
        }
    }

    /// Recompute all `link_from` sets from the `link` fields
    ///
    /// Links that `link` would refuse (missing target, flow/data mix, wrong
    /// direction, incompatible types) are dropped. Returns how many were dropped.
    pub fn rebuild_reverse_links(&mut self) -> usize {
        for pin in self.pins.values_mut() {
            pin.link_from.clear();
        }
        let links: Vec<(IdType, IdType)> = self
            .pins
            .values()
            .filter_map(|p| p.link.map(|target| (p.id, target)))
            .collect();

        let mut dropped = 0;
        for (from, to) in links {
            if let Err(e) = self.can_link(from, to) {
                debug!(from, to, error = %e, "dropping invalid link");
                if let Some(pin) = self.pins.get_mut(&from) {
                    pin.link = None;
                }
                dropped += 1;
                continue;
            }
            if let Some(target) = self.pins.get_mut(&to) {
                target.link_from.insert(from);
            }
        }
        dropped
    }

    /// Change the id of a pin, keeping links on both ends pointing at it
    pub fn rekey(&mut self, old: IdType, new: IdType) -> Result<(), LinkError> {
        if old == new {
            return Ok(());
        }
        if self.pins.contains_key(&new) {
            return Err(LinkError::DuplicateId(new));
        }
        let mut pin = self.pins.remove(&old).ok_or(LinkError::PinNotFound(old))?;
        pin.id = new;
        if let Some(target) = pin.link.and_then(|t| self.pins.get_mut(&t)) {
            target.link_from.remove(&old);
            target.link_from.insert(new);
        }
        for source in &pin.link_from {
            if let Some(src) = self.pins.get_mut(source) {
                src.link = Some(new);
            }
        }
        self.pins.insert(new, pin);
        Ok(())
    }

    /// Copy the provider's current value into the receiver's literal
    pub fn snapshot_link_value(&mut self, receiver: IdType, provider: IdType) {
        let Some(value) = self.pins.get(&provider).map(|p| p.value.clone()) else {
            return;
        };
        if let Some(pin) = self.pins.get_mut(&receiver) {
            if let Some(converted) = value.convert_to(pin.pin_type) {
                pin.value = converted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PinTable {
        let mut pins = PinTable::new();
        // node 1: flow out 10, float out 11
        pins.insert(Pin::new(10, 1, "Exit", PinType::Flow, PinKind::Output)).unwrap();
        pins.insert(Pin::new(11, 1, "Out", PinType::Float, PinKind::Output)).unwrap();
        // node 2: flow in 20, float in 21, string in 22
        pins.insert(Pin::new(20, 2, "Enter", PinType::Flow, PinKind::Input)).unwrap();
        pins.insert(Pin::new(21, 2, "In", PinType::Float, PinKind::Input)).unwrap();
        pins.insert(Pin::new(22, 2, "Text", PinType::String, PinKind::Input)).unwrap();
        pins
    }

    fn assert_symmetric(pins: &PinTable) {
        for pin in pins.iter() {
            if let Some(target) = pin.link {
                assert!(pins.get(target).unwrap().link_from.contains(&pin.id));
            }
            for source in &pin.link_from {
                assert_eq!(pins.get(*source).unwrap().link, Some(pin.id));
            }
        }
    }

    #[test]
    fn test_link_and_unlink_are_symmetric() {
        let mut pins = table();
        pins.link(10, 20).unwrap();
        pins.link(21, 11).unwrap();
        assert_symmetric(&pins);
        assert_eq!(pins.link_target(21).map(|p| p.id), Some(11));
        assert_eq!(pins.find_pins_linked_to(11), vec![21]);

        assert_eq!(pins.unlink(21), Some(11));
        assert!(pins.get(11).unwrap().link_from.is_empty());
        assert!(!pins.get(21).unwrap().is_linked());
        assert_symmetric(&pins);
    }

    #[test]
    fn test_link_validation() {
        let mut pins = table();
        assert_eq!(pins.link(20, 10), Err(LinkError::Direction { from: 20, to: 10 }));
        assert!(matches!(pins.link(22, 11), Err(LinkError::TypeMismatch { .. })));
        assert!(matches!(pins.link(10, 21), Err(LinkError::TypeMismatch { .. })));
        assert_eq!(pins.link(21, 99), Err(LinkError::PinNotFound(99)));
        assert_eq!(pins.link(10, 11), Err(LinkError::SameNode(10, 11)));
    }

    #[test]
    fn test_relink_replaces_previous_link() {
        let mut pins = table();
        pins.insert(Pin::new(30, 3, "Out", PinType::Double, PinKind::Output)).unwrap();
        pins.link(21, 11).unwrap();
        pins.link(21, 30).unwrap();
        assert!(pins.get(11).unwrap().link_from.is_empty());
        assert_eq!(pins.link_target(21).map(|p| p.id), Some(30));
        assert_symmetric(&pins);
    }

    #[test]
    fn test_dangling_link_fails_soft() {
        let mut pins = table();
        pins.link(21, 11).unwrap();
        pins.remove(11);
        assert!(pins.link_target(21).is_none());
        assert!(!pins.has_any_link(21));
        assert_symmetric(&pins);
    }

    #[test]
    fn test_rebuild_reverse_links_drops_dangling() {
        let mut pins = table();
        pins.get_mut(21).unwrap().link = Some(11);
        pins.get_mut(22).unwrap().link = Some(404);
        assert_eq!(pins.rebuild_reverse_links(), 1);
        assert!(pins.get(11).unwrap().link_from.contains(&21));
        assert!(pins.get(22).unwrap().link.is_none());
        assert_symmetric(&pins);
    }

    #[test]
    fn test_rebuild_reverse_links_drops_invalid_links() {
        let mut pins = table();
        // Flow output into a data input
        pins.get_mut(10).unwrap().link = Some(21);
        // Data output pointing back at its consumer
        pins.get_mut(11).unwrap().link = Some(21);
        // Float provider for a string input
        pins.get_mut(22).unwrap().link = Some(11);
        // Flow input pointing at a flow output
        pins.get_mut(20).unwrap().link = Some(10);
        assert_eq!(pins.rebuild_reverse_links(), 4);
        assert!(pins.iter().all(|p| p.link.is_none() && p.link_from.is_empty()));

        pins.get_mut(10).unwrap().link = Some(20);
        pins.get_mut(21).unwrap().link = Some(11);
        assert_eq!(pins.rebuild_reverse_links(), 0);
        assert_eq!(pins.link_target(10).map(|p| p.id), Some(20));
        assert_eq!(pins.link_target(21).map(|p| p.id), Some(11));
        assert_symmetric(&pins);
    }

    #[test]
    fn test_rekey_keeps_links() {
        let mut pins = table();
        pins.link(21, 11).unwrap();
        pins.rekey(11, 111).unwrap();
        assert_eq!(pins.link_target(21).map(|p| p.id), Some(111));
        assert_eq!(pins.rekey(20, 21), Err(LinkError::DuplicateId(21)));
        assert_symmetric(&pins);
    }

    #[test]
    fn test_snapshot_link_value() {
        let mut pins = table();
        pins.set_value(11, 2.5f32);
        pins.link(21, 11).unwrap();
        pins.snapshot_link_value(21, 11);
        pins.unlink(21);
        assert_eq!(pins.value(21), Some(&PinValue::Float(2.5)));
    }
}
