//! Stable name → integer tables for entities discovered at startup.
//!
//! Disk, InfiniBand and CPU-frequency sources enumerate their entities once
//! when opened. Binary records then carry the integer index instead of the
//! name. Entities that show up later are not in the table: they are logged
//! once and dropped.

use std::collections::{HashMap, HashSet};

use tracing::warn;

/// Width of a zero-padded name field in binary headers.
pub const NAME_LEN: usize = 32;

#[derive(Debug, Default)]
pub struct EntityIndex {
    by_name: HashMap<String, u32>,
    names: Vec<String>,
    unknown: HashSet<String>,
}

impl EntityIndex {
    /// Assigns indices in iteration order; duplicate names keep their first index.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::default();
        for name in names {
            let name = name.into();
            if index.by_name.contains_key(&name) {
                continue;
            }
            let id = index.names.len() as u32;
            index.by_name.insert(name.clone(), id);
            index.names.push(name);
        }
        index
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Like [`get`](Self::get), but warns the first time an unknown name is seen.
    pub fn lookup(&mut self, metric: &str, name: &str) -> Option<u32> {
        let id = self.get(name);
        if id.is_none() && self.unknown.insert(name.to_string()) {
            warn!(
                metric,
                entity = name,
                "entity appeared after startup, ignoring it"
            );
        }
        id
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (i as u32, n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Binary header: entry count as u32, then for each entry its index
    /// (u32), padded name and whatever `extra` appends. Little endian.
    pub fn header_with<E>(&self, mut extra: E) -> Vec<u8>
    where
        E: FnMut(u32, &str, &mut Vec<u8>),
    {
        let mut out = Vec::with_capacity(4 + self.len() * (4 + NAME_LEN + 4));
        out.extend_from_slice(&(self.len() as u32).to_le_bytes());
        for (id, name) in self.iter() {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&padded_name(name));
            extra(id, name, &mut out);
        }
        out
    }
}

/// Name as a fixed-width zero-padded array, truncated if longer.
pub fn padded_name(name: &str) -> [u8; NAME_LEN] {
    let mut out = [0u8; NAME_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_LEN);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_follow_input_order() {
        let index = EntityIndex::new(["sda", "nvme0n1", "sda"]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("sda"), Some(0));
        assert_eq!(index.get("nvme0n1"), Some(1));
        assert_eq!(index.name(1), Some("nvme0n1"));
        assert_eq!(
            index.iter().collect::<Vec<_>>(),
            vec![(0, "sda"), (1, "nvme0n1")]
        );
    }

    #[test]
    fn test_unknown_entity_is_dropped() {
        let mut index = EntityIndex::new(["mlx5_0"]);
        assert_eq!(index.lookup("ib", "mlx5_1"), None);
        assert_eq!(index.lookup("ib", "mlx5_1"), None);
        assert_eq!(index.lookup("ib", "mlx5_0"), Some(0));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_header_layout() {
        let index = EntityIndex::new(["sda", "sdb"]);
        let header = index.header_with(|id, _, out| out.extend_from_slice(&(id * 10).to_le_bytes()));
        assert_eq!(header.len(), 4 + 2 * (4 + NAME_LEN + 4));
        assert_eq!(&header[..4], &2u32.to_le_bytes());
        assert_eq!(&header[4..8], &0u32.to_le_bytes());
        assert_eq!(&header[8..11], b"sda");
        let second = 4 + 4 + NAME_LEN + 4;
        assert_eq!(&header[second..second + 4], &1u32.to_le_bytes());
        assert_eq!(&header[header.len() - 4..], &10u32.to_le_bytes());
    }

    #[test]
    fn test_padded_name() {
        let padded = padded_name("sda");
        assert_eq!(&padded[..3], b"sda");
        assert!(padded[3..].iter().all(|b| *b == 0));

        let long = "x".repeat(40);
        assert_eq!(padded_name(&long), [b'x'; NAME_LEN]);
    }
}
