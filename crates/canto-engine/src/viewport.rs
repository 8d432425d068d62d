//! Visible address set.

use canto_core::Address;
use dashmap::DashSet;

/// Addresses currently visible to the presentation consumer.
///
/// Consulted on reconnection to decide what to refetch immediately.
#[derive(Debug, Default)]
pub struct Viewport {
    visible: DashSet<Address>,
}

impl Viewport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the visible set.
    pub fn set(&self, addresses: impl IntoIterator<Item = Address>) {
        self.visible.clear();
        for address in addresses {
            self.visible.insert(address);
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.visible.contains(address)
    }

    /// Visible addresses, coarse first.
    pub fn addresses(&self) -> Vec<Address> {
        let mut all: Vec<Address> = self.visible.iter().map(|a| a.key().clone()).collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces() {
        let viewport = Viewport::new();
        viewport.set([Address::root(0), Address::root(1)]);
        viewport.set([Address::root(2)]);
        assert_eq!(viewport.addresses(), vec![Address::root(2)]);
        assert!(!viewport.contains(&Address::root(0)));
    }
}
