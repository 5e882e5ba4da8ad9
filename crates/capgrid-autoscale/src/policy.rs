//! Policy selection by configuration.

use capgrid_core::{CapgridConfig, PolicyConfig};
use capgrid_placement::{AllocationPolicy, SimplePolicy, StaticThresholdPolicy};

use crate::controller::CapacityController;

/// Build the allocation policy `config.policy` names.
pub fn build_policy(config: &CapgridConfig) -> Box<dyn AllocationPolicy> {
    match &config.policy {
        PolicyConfig::Predictive => Box::new(CapacityController::new(config.controller.clone())),
        PolicyConfig::Simple => Box::new(SimplePolicy),
        PolicyConfig::StaticThreshold { upper_threshold } => {
            Box::new(StaticThresholdPolicy::new(*upper_threshold))
        }
    }
}
