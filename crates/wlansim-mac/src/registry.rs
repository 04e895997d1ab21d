//! Ordered station registry with an id index.

use crate::station::Station;
use std::collections::HashMap;
use wlansim_common::{Identifier, NodeId, SimError};

/// Stations in insertion order.
///
/// Iteration order is registration order, which fixes the order in which
/// sources are polled and random draws are taken.
#[derive(Debug, Default)]
pub struct StationRegistry {
    stations: Vec<Station>,
    index: HashMap<NodeId, usize>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a station; fails without side effects if the id is taken.
    pub fn insert(&mut self, station: Station) -> Result<(), SimError> {
        let id = station.id();
        if self.index.contains_key(&id) {
            return Err(SimError::DuplicateIdentifier(Identifier::Node(id)));
        }
        self.index.insert(id, self.stations.len());
        self.stations.push(station);
        Ok(())
    }

    /// Remove a station, keeping the order of the others.
    pub fn remove(&mut self, id: NodeId) -> Result<Station, SimError> {
        let position = self
            .index
            .remove(&id)
            .ok_or(SimError::UnknownIdentifier(Identifier::Node(id)))?;
        let station = self.stations.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Ok(station)
    }

    pub fn clear(&mut self) {
        self.stations.clear();
        self.index.clear();
    }

    pub fn get(&self, id: NodeId) -> Result<&Station, SimError> {
        self.index
            .get(&id)
            .map(|&i| &self.stations[i])
            .ok_or(SimError::UnknownIdentifier(Identifier::Node(id)))
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut Station, SimError> {
        match self.index.get(&id) {
            Some(&i) => Ok(&mut self.stations[i]),
            None => Err(SimError::UnknownIdentifier(Identifier::Node(id))),
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Ids in registration order.
    pub fn ids(&self) -> Vec<NodeId> {
        self.stations.iter().map(|s| s.id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Station> {
        self.stations.iter_mut()
    }

    /// All stations, for the arbiter.
    pub fn stations_mut(&mut self) -> &mut [Station] {
        &mut self.stations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::NodeParams;
    use wlansim_common::Position;
    use wlansim_phy::PhyProfile;

    fn station(id: u32) -> Station {
        let timing = PhyProfile::default().access_timing(1, 1, 2);
        Station::new(NodeParams::new(NodeId(id), 1_000_000, 50.0, Position::default()), timing)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut registry = StationRegistry::new();
        registry.insert(station(7)).expect("fresh id");
        registry.insert(station(3)).expect("fresh id");
        assert_eq!(registry.ids(), vec![NodeId(7), NodeId(3)]);
        assert_eq!(registry.get(NodeId(3)).map(|s| s.id()), Ok(NodeId(3)));
        assert_eq!(
            registry.insert(station(7)).unwrap_err(),
            SimError::DuplicateIdentifier(Identifier::Node(NodeId(7)))
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_keeps_order_and_index() {
        let mut registry = StationRegistry::new();
        for id in [1, 2, 3, 4] {
            registry.insert(station(id)).expect("fresh id");
        }
        registry.remove(NodeId(2)).expect("present");
        assert_eq!(registry.ids(), vec![NodeId(1), NodeId(3), NodeId(4)]);
        assert_eq!(registry.get(NodeId(4)).map(|s| s.id()), Ok(NodeId(4)));
        assert!(registry.remove(NodeId(2)).is_err());
        assert!(registry.get_mut(NodeId(2)).is_err());

        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains(NodeId(1)));
    }
}
