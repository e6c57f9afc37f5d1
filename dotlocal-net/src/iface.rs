// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Interface state from the OS address tables
//!
//! `if-addrs` exposes configured addresses but not carrier state, so an
//! interface counts as up exactly while it holds a non-loopback
//! address. A cable pull and a DHCP loss therefore look the same, which
//! suits the responder: both mean the advertised records are stale and
//! the claims must be re-probed once addressing returns.

use std::net::{Ipv4Addr, Ipv6Addr};

use dotlocal_responder::NetInterface;

/// [`NetInterface`] sampling the host's address tables on every call.
pub struct SystemInterface {
    name: Option<String>,
}

impl SystemInterface {
    /// Follow every non-loopback interface, first usable address wins.
    pub fn new() -> Self {
        Self { name: None }
    }

    /// Pin to one interface by OS name, e.g. `"eth0"`.
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_owned()),
        }
    }

    fn addresses(&self) -> Vec<if_addrs::Interface> {
        match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces
                .into_iter()
                .filter(|iface| !iface.is_loopback())
                .filter(|iface| self.name.as_deref().map_or(true, |name| iface.name == name))
                .collect(),
            Err(err) => {
                log::warn!("cannot enumerate interfaces: {}", err);
                Vec::new()
            }
        }
    }
}

impl Default for SystemInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl NetInterface for SystemInterface {
    fn is_up(&self) -> bool {
        !self.addresses().is_empty()
    }

    fn link_up(&self) -> bool {
        self.is_up()
    }

    fn ipv4_addr(&self) -> Option<Ipv4Addr> {
        self.addresses().into_iter().find_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) => Some(v4.ip),
            if_addrs::IfAddr::V6(_) => None,
        })
    }

    fn ipv6_addr(&self) -> Option<Ipv6Addr> {
        self.addresses().into_iter().find_map(|iface| match iface.addr {
            if_addrs::IfAddr::V6(v6) => Some(v6.ip),
            if_addrs::IfAddr::V4(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_interface_is_down() {
        let iface = SystemInterface::named("does-not-exist-0");
        assert!(!iface.is_up());
        assert!(!iface.link_up());
        assert!(iface.ipv4_addr().is_none());
        assert!(iface.ipv6_addr().is_none());
    }
}
