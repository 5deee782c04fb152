use crate::Duration;
use serde::Serialize;

use crate::five_tuple::FiveTuple;

/// Unique `Flow` identifier
#[allow(clippy::upper_case_acronyms)]
pub type FlowID = u64;

/// Network flow information
#[derive(Clone, PartialEq, Eq, Default, Debug, Serialize)]
pub struct Flow {
    /// The `Flow` identifier
    pub flow_id: FlowID,
    /// The `FiveTuple` identifying the `Flow` (direction of the first packet seen)
    pub five_tuple: FiveTuple,
    /// timestamp of first packet
    pub first_seen: Duration,
    /// timestamp of last seen packet
    pub last_seen: Duration,
    /// number of packets seen, both directions
    pub packets: u64,
}

impl Flow {
    pub fn new(flow_id: FlowID, five_tuple: &FiveTuple, ts: Duration) -> Self {
        Flow {
            flow_id,
            five_tuple: five_tuple.clone(),
            first_seen: ts,
            last_seen: ts,
            packets: 0,
        }
    }

    /// Account for one more packet of this flow
    pub fn touch(&mut self, ts: Duration) {
        self.last_seen = ts;
        self.packets += 1;
    }

    /// true if `five_tuple` is in the same direction as the first packet of the flow
    pub fn is_forward(&self, five_tuple: &FiveTuple) -> bool {
        self.five_tuple == *five_tuple
    }
}
