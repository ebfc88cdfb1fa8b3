use crate::onewire::Address;
use heapless::Vec;

/// Returned by [`DeviceTable::insert`] when the table is full. Carries the address that did not
/// fit.
#[derive(Debug, PartialEq)]
pub struct CapacityExceeded(pub Address);

/// The addresses of discovered sensors, in discovery order.
///
/// Capacity is fixed at compile time. Insertion past capacity is refused rather than written out of
/// bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTable<const N: usize> {
    addresses: Vec<Address, N>,
}

impl<const N: usize> Default for DeviceTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> DeviceTable<N> {
    pub const fn new() -> Self {
        DeviceTable {
            addresses: Vec::new(),
        }
    }

    pub fn insert(&mut self, address: Address) -> Result<(), CapacityExceeded> {
        self.addresses.push(address).map_err(CapacityExceeded)
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.addresses.is_full()
    }

    pub fn get(&self, index: usize) -> Option<&Address> {
        self.addresses.get(index)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Address> {
        self.addresses.iter()
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.addresses
    }
}

impl<'a, const N: usize> IntoIterator for &'a DeviceTable<N> {
    type Item = &'a Address;
    type IntoIter = core::slice::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
