// BSD 3-Clause License
// Copyright (c) 2026, Virtual Cable S.L.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice,
//    this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice,
//    this list of conditions and the following disclaimer in the documentation
//    and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors
//    may be used to endorse or promote products derived from this software
//    without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
// AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
// FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
// CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
// OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

// Authors: Adolfo Gómez, dkmaster at dkmon dot com

use std::net::IpAddr;

use anyhow::{Result, bail};

/// IP access list with allow-minus-deny semantics. Entries are CIDR
/// networks; a leading `!` marks a deny entry. An ACL without allow
/// entries admits every address not explicitly denied.
#[derive(Debug, Clone, Default)]
pub struct IpAcl {
    allow: Vec<Cidr>,
    deny: Vec<Cidr>,
}

#[derive(Debug, Clone, Copy)]
struct Cidr {
    // IPv4 networks kept as mapped IPv6 so one comparison path suffices
    network: u128,
    prefix: u8,
}

impl Cidr {
    fn parse(entry: &str) -> Result<Cidr> {
        let (addr_str, prefix_str) = match entry.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (entry, None),
        };

        let addr: IpAddr = addr_str
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid ACL address: {:?}", entry))?;

        let (bits, width) = match addr {
            IpAddr::V4(v4) => (u128::from(v4.to_ipv6_mapped()), 32u8),
            IpAddr::V6(v6) => (u128::from(v6), 128u8),
        };

        let prefix = match prefix_str {
            Some(p) => {
                let p: u8 = p
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid ACL prefix: {:?}", entry))?;
                if p > width {
                    bail!("ACL prefix out of range: {:?}", entry);
                }
                p
            }
            None => width,
        };

        // Store the prefix relative to the 128 bit mapped form
        let prefix = prefix + (128 - width);

        Ok(Cidr {
            network: bits & mask(prefix),
            prefix,
        })
    }

    fn contains(&self, addr: IpAddr) -> bool {
        let bits = match addr {
            IpAddr::V4(v4) => u128::from(v4.to_ipv6_mapped()),
            IpAddr::V6(v6) => u128::from(v6),
        };
        bits & mask(self.prefix) == self.network
    }
}

fn mask(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix)
    }
}

impl IpAcl {
    pub fn parse(entries: &[String]) -> Result<IpAcl> {
        let mut acl = IpAcl::default();
        for entry in entries {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if let Some(denied) = entry.strip_prefix('!') {
                acl.deny.push(Cidr::parse(denied.trim())?);
            } else {
                acl.allow.push(Cidr::parse(entry)?);
            }
        }
        Ok(acl)
    }

    pub fn check(&self, addr: IpAddr) -> bool {
        if self.deny.iter().any(|c| c.contains(addr)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|c| c.contains(addr))
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl(entries: &[&str]) -> IpAcl {
        let entries: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
        IpAcl::parse(&entries).unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_acl_admits_all() {
        let acl = acl(&[]);
        assert!(acl.check(ip("192.168.1.1")));
        assert!(acl.check(ip("::1")));
    }

    #[test]
    fn test_allow_list() {
        let acl = acl(&["192.168.0.0/16"]);
        assert!(acl.check(ip("192.168.7.1")));
        assert!(!acl.check(ip("10.0.0.1")));
    }

    #[test]
    fn test_deny_overrides_allow() {
        let acl = acl(&["192.168.0.0/16", "!192.168.1.7"]);
        assert!(acl.check(ip("192.168.1.6")));
        assert!(!acl.check(ip("192.168.1.7")));
    }

    #[test]
    fn test_deny_only() {
        let acl = acl(&["!10.0.0.0/8"]);
        assert!(!acl.check(ip("10.1.2.3")));
        assert!(acl.check(ip("172.16.0.1")));
    }

    #[test]
    fn test_host_entry_without_prefix() {
        let acl = acl(&["127.0.0.1"]);
        assert!(acl.check(ip("127.0.0.1")));
        assert!(!acl.check(ip("127.0.0.2")));
    }

    #[test]
    fn test_ipv6_network() {
        let acl = acl(&["fd00::/8"]);
        assert!(acl.check(ip("fd00::1")));
        assert!(!acl.check(ip("fe80::1")));
    }

    #[test]
    fn test_zero_prefix_matches_everything() {
        let acl = acl(&["0.0.0.0/0"]);
        assert!(acl.check(ip("203.0.113.9")));
    }

    #[test]
    fn test_invalid_entries() {
        assert!(IpAcl::parse(&["not-an-ip".to_string()]).is_err());
        assert!(IpAcl::parse(&["10.0.0.0/33".to_string()]).is_err());
    }
}
