//! Deploy planning — instance names, ports, and image references.
//!
//! Direct-strategy units keep their configured identity. Blue-green units
//! get a slot suffix (`shopfront-api-green`); the green slot publishes
//! `port + 1` so both slots can coexist on one host while only the active
//! one is routed to.

use gangway_core::{TargetConfig, UnitConfig};
use gangway_state::ActiveSlot;

/// Everything needed to deploy and gate one unit.
#[derive(Debug, Clone)]
pub struct UnitPlan {
    pub unit: UnitConfig,
    /// Container name the new instance runs under.
    pub instance: String,
    /// Host port the new instance publishes.
    pub port: u16,
    /// Full image reference including the deploy tag.
    pub image: String,
}

/// Container name for a unit in a given slot (None = direct).
pub fn instance_name(unit: &UnitConfig, slot: Option<ActiveSlot>) -> String {
    match slot {
        Some(slot) => format!("{}-{}", unit.name, slot),
        None => unit.name.clone(),
    }
}

/// Published host port for a unit in a given slot.
pub fn instance_port(unit: &UnitConfig, slot: Option<ActiveSlot>) -> u16 {
    match slot {
        Some(ActiveSlot::Green) => unit.port + 1,
        _ => unit.port,
    }
}

/// Build the per-unit plans for deploying `tag` into `slot`.
pub fn plan_units(config: &TargetConfig, slot: Option<ActiveSlot>, tag: &str) -> Vec<UnitPlan> {
    config
        .units
        .iter()
        .map(|unit| UnitPlan {
            unit: unit.clone(),
            instance: instance_name(unit, slot),
            port: instance_port(unit, slot),
            image: format!("{}:{tag}", unit.image),
        })
        .collect()
}
