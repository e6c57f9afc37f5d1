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

//! Scriptable network interface

use std::cell::RefCell;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::rc::Rc;

use dotlocal_responder::NetInterface;

struct IfaceConfig {
    up: bool,
    link: bool,
    v4: Option<Ipv4Addr>,
    v6: Option<Ipv6Addr>,
}

/// A network interface whose state the test scripts.
///
/// Starts up with link and the IPv4 address `192.168.1.50`, so a fresh
/// mock is operational. Clones share state; keep one clone to flip the
/// link or change addresses while the host holds another.
#[derive(Clone)]
pub struct MockInterface {
    inner: Rc<RefCell<IfaceConfig>>,
}

impl MockInterface {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(IfaceConfig {
                up: true,
                link: true,
                v4: Some(Ipv4Addr::new(192, 168, 1, 50)),
                v6: None,
            })),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.inner.borrow_mut().up = up;
    }

    pub fn set_link(&self, link: bool) {
        self.inner.borrow_mut().link = link;
    }

    pub fn set_ipv4(&self, addr: Option<Ipv4Addr>) {
        self.inner.borrow_mut().v4 = addr;
    }

    pub fn set_ipv6(&self, addr: Option<Ipv6Addr>) {
        self.inner.borrow_mut().v6 = addr;
    }
}

impl Default for MockInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl NetInterface for MockInterface {
    fn is_up(&self) -> bool {
        self.inner.borrow().up
    }

    fn link_up(&self) -> bool {
        self.inner.borrow().link
    }

    fn ipv4_addr(&self) -> Option<Ipv4Addr> {
        self.inner.borrow().v4
    }

    fn ipv6_addr(&self) -> Option<Ipv6Addr> {
        self.inner.borrow().v6
    }
}
