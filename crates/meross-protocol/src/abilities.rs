//! Capability / ability model (§3 "Device record", §4.9 "Capability checks").
//!
//! Abilities are fetched once per device via `GET Appliance.System.Ability`
//! and are immutable for the session once stored.

use serde_json::Value;
use std::collections::HashMap;

/// Namespace → capability descriptor, as returned by `Appliance.System.Ability`.
#[derive(Debug, Clone, Default)]
pub struct Abilities(HashMap<String, Value>);

/// Ability key the Meross ecosystem uses to distinguish hub devices
/// (§9 open question 3 — preserved verbatim, do not change silently).
pub const HUB_DISCRIMINATOR_ABILITY: &str = "Appliance.Hub.SubDevice.List";

pub const LIGHT_ABILITY: &str = "Appliance.Control.Light";

/// Light capacity bit flags (§4.9).
pub const CAPACITY_RGB: u64 = 1;
pub const CAPACITY_TEMPERATURE: u64 = 2;
pub const CAPACITY_LUMINANCE: u64 = 4;

impl Abilities {
    pub fn from_map(map: HashMap<String, Value>) -> Self {
        Self(map)
    }

    pub fn has(&self, namespace: &str) -> bool {
        self.0.contains_key(namespace)
    }

    pub fn get(&self, namespace: &str) -> Option<&Value> {
        self.0.get(namespace)
    }

    pub fn is_hub(&self) -> bool {
        self.has(HUB_DISCRIMINATOR_ABILITY)
    }

    /// Build a filtered copy scoped to a subdevice type, by keeping only
    /// abilities whose namespace contains the given scope tag
    /// (§4.11 step 7: "Each subdevice inherits a filtered slice of the
    /// hub's abilities scoped by its subdevice type").
    pub fn scoped_to(&self, subdevice_type_tag: &str) -> Self {
        let filtered = self
            .0
            .iter()
            .filter(|(ns, _)| ns.contains(subdevice_type_tag))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self(filtered)
    }

    fn light_capacity(&self) -> u64 {
        self.get(LIGHT_ABILITY)
            .and_then(|v| v.get("capacity"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    pub fn supports_rgb(&self) -> bool {
        self.light_capacity() & CAPACITY_RGB != 0
    }

    pub fn supports_temperature(&self) -> bool {
        self.light_capacity() & CAPACITY_TEMPERATURE != 0
    }

    pub fn supports_luminance(&self) -> bool {
        self.light_capacity() & CAPACITY_LUMINANCE != 0
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|s| s.as_str())
    }
}
