use super::types::Exchange;
use crate::operation::types::{OBJECT_ID, OPERATION};

/// Copies inbound headers onto the outbound section after a dispatch.
pub trait HeaderPropagator: Send + Sync {
    fn copy_headers(&self, exchange: &mut Exchange);
}

/// Propagates every inbound header except the per-request control headers
/// (`OPERATION` and `OBJECT_ID`), which must not leak into the next stage.
#[derive(Debug, Clone, Default)]
pub struct StripControlHeaders;

impl StripControlHeaders {
    pub const CONTROL_HEADERS: [&'static str; 2] = [OBJECT_ID, OPERATION];
}

impl HeaderPropagator for StripControlHeaders {
    fn copy_headers(&self, exchange: &mut Exchange) {
        for (name, value) in exchange.inbound.headers.iter() {
            if Self::CONTROL_HEADERS.contains(&name.as_str()) {
                continue;
            }
            exchange.outbound.headers.insert(name.clone(), value.clone());
        }
    }
}
