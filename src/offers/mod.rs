//! Offer intake
//!
//! Every offer refreshes what we know about its host, then passes through the
//! placement guard. Only accepted offers go on to placement scoring.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LifecycleError;
use crate::machine::HostLifecycleManager;
use crate::placement::{PlacementDecision, PlacementGuard, PlacementRejection};

/// A transient grant of capacity from one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: String,
    pub host_id: String,
    pub host_address: String,
    pub domain_id: String,
    #[serde(default)]
    pub resources: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedOffer {
    pub offer: Offer,
    pub reason: PlacementRejection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OfferOutcome {
    pub accepted: Vec<Offer>,
    pub rejected: Vec<RejectedOffer>,
}

pub struct OfferIntake {
    hosts: Arc<HostLifecycleManager>,
    guard: Arc<PlacementGuard>,
}

impl OfferIntake {
    pub fn new(hosts: Arc<HostLifecycleManager>, guard: Arc<PlacementGuard>) -> Self {
        Self { hosts, guard }
    }

    /// Record each offering host and split offers by placement eligibility.
    ///
    /// A store failure aborts the batch.
    pub fn process_offers(&self, offers: Vec<Offer>) -> Result<OfferOutcome, LifecycleError> {
        let now = Utc::now();
        let mut outcome = OfferOutcome::default();

        for offer in offers {
            self.hosts
                .observe_offer(&offer.host_id, &offer.host_address, &offer.domain_id, now)?;

            match self.guard.evaluate(&offer.host_id)? {
                PlacementDecision::Eligible => outcome.accepted.push(offer),
                PlacementDecision::Rejected(reason) => {
                    debug!(
                        offer = %offer.offer_id,
                        host = %offer.host_id,
                        reason = %reason,
                        "offer declined"
                    );
                    outcome.rejected.push(RejectedOffer { offer, reason });
                }
            }
        }

        Ok(outcome)
    }
}
