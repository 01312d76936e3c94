//! Per-node subnet pool

use std::collections::HashSet;
use std::net::Ipv4Addr;

use super::RegistryError;

/// Prefix length of the subnet handed to each node
const NODE_PREFIX: u8 = 24;

/// Ordered list of /24 subnets carved out of a configured range
#[derive(Debug, Clone)]
pub struct SubnetPool {
    subnets: Vec<String>,
}

impl SubnetPool {
    /// Split `range` (e.g. `192.168.0.0/16`) into /24 subnets
    pub fn from_range(range: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::InvalidSubnetRange(range.to_string());

        let (addr, prefix) = range.split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.trim().parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.trim().parse().map_err(|_| invalid())?;
        if prefix > NODE_PREFIX {
            return Err(invalid());
        }

        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        };
        let network = u32::from(addr) & mask;
        let count = 1u32 << (NODE_PREFIX - prefix);

        let subnets = (0..count)
            .map(|i| {
                let base = Ipv4Addr::from(network + (i << (32 - NODE_PREFIX)));
                format!("{}/{}", base, NODE_PREFIX)
            })
            .collect();

        Ok(Self { subnets })
    }

    pub fn len(&self) -> usize {
        self.subnets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subnets.is_empty()
    }

    /// First subnet not present in `used`
    pub fn allocate(&self, used: &HashSet<String>) -> Option<String> {
        self.subnets.iter().find(|s| !used.contains(*s)).cloned()
    }
}
