//! Traffic cutover — the only stage that changes what serves live traffic.
//!
//! Direct strategy: the new units already own the old network identities;
//! cutover is a proxy reload. Blue-green: cutover is a compare-and-swap of
//! the active-slot pointer followed by a reload; the pointer write is the
//! single atomic step that moves traffic.
//!
//! Failure never leaves traffic pointed at an unvalidated slot: a failed
//! blue-green reload flips the pointer back and reloads again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use gangway_core::TargetConfig;
use gangway_exec::{ContainerRuntime, ReverseProxy};
use gangway_state::{ActiveSlot, SlotPointer, StateStore};

use crate::error::{RolloutError, RolloutResult};
use crate::plan::instance_name;

/// Executes the traffic switch for both strategies.
pub struct CutoverController {
    runtime: Arc<dyn ContainerRuntime>,
    proxy: Option<Arc<dyn ReverseProxy>>,
    state: StateStore,
}

impl CutoverController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        proxy: Option<Arc<dyn ReverseProxy>>,
        state: StateStore,
    ) -> Self {
        Self {
            runtime,
            proxy,
            state,
        }
    }

    /// Direct cutover: the new units are already listening under the old
    /// identities; reload the proxy so it re-resolves them.
    pub async fn cutover_direct(&self) -> RolloutResult<()> {
        if let Some(proxy) = &self.proxy {
            proxy
                .reload()
                .await
                .map_err(|e| RolloutError::Cutover(format!("proxy reload: {e}")))?;
        }
        info!("direct cutover complete");
        Ok(())
    }

    /// Blue-green cutover: CAS the pointer from the observed value to the
    /// other slot, then reload the proxy.
    ///
    /// `observed` is the pointer read when the deploy computed its inactive
    /// slot; if anything else wrote the pointer since, the CAS fails and so
    /// does the cutover — never a silent overwrite.
    ///
    /// On reload failure the pointer is flipped back and a best-effort
    /// reload restores routing to the old slot.
    pub async fn cutover_blue_green(&self, observed: SlotPointer) -> RolloutResult<SlotPointer> {
        let new_slot = observed.slot.other();
        let flipped = self
            .state
            .swap_slot(observed, new_slot)
            .map_err(|e| RolloutError::Cutover(format!("slot pointer swap: {e}")))?;
        info!(from = %observed.slot, to = %new_slot, "active slot flipped");

        if let Some(proxy) = &self.proxy {
            if let Err(reload_err) = proxy.reload().await {
                warn!(error = %reload_err, "reload failed after slot flip; reverting pointer");
                match self.state.swap_slot(flipped, observed.slot) {
                    Ok(reverted) => {
                        info!(slot = %reverted.slot, "slot pointer reverted");
                        if let Err(e) = proxy.reload().await {
                            warn!(error = %e, "reload after pointer revert failed");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "pointer revert failed");
                    }
                }
                return Err(RolloutError::Cutover(format!("proxy reload: {reload_err}")));
            }
        }

        Ok(flipped)
    }

    /// Tear down the superseded slot after the drain grace period.
    ///
    /// Deferred and best-effort: the pipeline outcome is already reported
    /// when this runs, and failure here only leaves stale containers.
    pub fn schedule_slot_teardown(
        &self,
        config: &TargetConfig,
        slot: ActiveSlot,
        grace: Duration,
    ) -> JoinHandle<()> {
        let runtime = self.runtime.clone();
        let instances: Vec<String> = config
            .units
            .iter()
            .map(|unit| instance_name(unit, Some(slot)))
            .collect();

        info!(%slot, grace_secs = grace.as_secs(), "old slot teardown scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            for instance in instances {
                if let Err(e) = runtime.stop_unit(&instance).await {
                    warn!(%instance, error = %e, "old slot stop failed");
                    continue;
                }
                if let Err(e) = runtime.remove_unit(&instance).await {
                    warn!(%instance, error = %e, "old slot removal failed");
                }
            }
        })
    }
}
