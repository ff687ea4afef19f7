/// Shared value types used across the game engine
///
/// Tracks:
/// - Resource triples (cpu / bandwidth / ram) with reserve arithmetic
/// - Wallets (crypto / data)
/// - Service and vulnerability descriptors on virtual servers

use serde::{Deserialize, Serialize};

/// A cpu/bandwidth/ram triple. Used both for a machine's capacity and for
/// the cost or reservation a tool holds. Deltas may be negative; effective
/// values are clamped at zero where the rules require it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Resources {
    pub cpu: i64,
    pub bandwidth: f64,
    pub ram: i64,
}

impl Resources {
    pub fn new(cpu: i64, bandwidth: f64, ram: i64) -> Self {
        Self { cpu, bandwidth, ram }
    }

    /// Component-wise sum without clamping.
    pub fn plus(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu + other.cpu,
            bandwidth: self.bandwidth + other.bandwidth,
            ram: self.ram + other.ram,
        }
    }

    /// Component-wise subtraction, clamped at zero.
    pub fn minus_clamped(&self, other: &Resources) -> Resources {
        Resources {
            cpu: (self.cpu - other.cpu).max(0),
            bandwidth: (self.bandwidth - other.bandwidth).max(0.0),
            ram: (self.ram - other.ram).max(0),
        }
    }

    /// Clamp each component at zero.
    pub fn clamped(&self) -> Resources {
        Resources {
            cpu: self.cpu.max(0),
            bandwidth: self.bandwidth.max(0.0),
            ram: self.ram.max(0),
        }
    }

    /// True when `self + request` stays within `capacity` component-wise.
    pub fn fits(&self, request: &Resources, capacity: &Resources) -> bool {
        self.cpu + request.cpu <= capacity.cpu
            && self.bandwidth + request.bandwidth <= capacity.bandwidth
            && self.ram + request.ram <= capacity.ram
    }

    /// True when every component is at least the counterpart in `other`.
    pub fn covers(&self, other: &Resources) -> bool {
        self.cpu >= other.cpu && self.bandwidth >= other.bandwidth && self.ram >= other.ram
    }

    pub fn is_non_negative(&self) -> bool {
        self.cpu >= 0 && self.bandwidth >= 0.0 && self.ram >= 0
    }
}

/// Currency balances. `crypto` is mined, `data` is the soft currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Wallet {
    pub crypto: f64,
    pub data: f64,
}

impl Wallet {
    pub fn new(crypto: f64, data: f64) -> Self {
        Self { crypto, data }
    }

    pub fn can_afford(&self, crypto: f64, data: f64) -> bool {
        self.crypto >= crypto && self.data >= data
    }
}

/// One exploit capability or vulnerability descriptor: a type tag plus a
/// numeric level. Matching is by equal type and `exploit.level >= vuln.level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exploit {
    #[serde(rename = "type")]
    pub kind: String,
    pub level: i64,
}

impl Exploit {
    pub fn new(kind: impl Into<String>, level: i64) -> Self {
        Self { kind: kind.into(), level }
    }

    /// True when this exploit satisfies the given vulnerability.
    pub fn satisfies(&self, vuln: &Exploit) -> bool {
        self.kind == vuln.kind && self.level >= vuln.level
    }
}

/// A network service running on a virtual server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub port: u16,
    pub vulnerable: bool,
    pub level: i64,
    #[serde(default)]
    pub vulnerabilities: Vec<Exploit>,
}

/// A role tag on a virtual server (rendered by `scan <ip>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub role: String,
    pub level: i64,
}

/// Merge `patches` worth of exploits over `base`: per-type max level, plus
/// any patch-only types.
pub fn merge_exploits(base: &[Exploit], upgrades: &[Exploit]) -> Vec<Exploit> {
    let mut merged: Vec<Exploit> = base.to_vec();
    for up in upgrades {
        match merged.iter_mut().find(|e| e.kind == up.kind) {
            Some(existing) => existing.level = existing.level.max(up.level),
            None => merged.push(up.clone()),
        }
    }
    merged
}
