//! Shared state handed to every command handler.

use std::sync::Arc;

use crate::devices::ConnectionRegistry;
use crate::radio::Radio;
use crate::scan::ScanManager;

/// The managers a handler may touch.
pub struct BridgeContext {
    /// Radio handle and availability.
    pub radio: Arc<Radio>,
    /// Scan session and discovery cache.
    pub scan: Arc<ScanManager>,
    /// Connection records.
    pub devices: Arc<ConnectionRegistry>,
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_helpers::make_test_context;

    #[test]
    fn managers_share_one_radio() {
        let (_sim, ctx) = make_test_context();
        assert!(ctx.radio.is_available());
        assert!(!ctx.scan.status().scanning);
        assert_eq!(ctx.devices.connected_count(), 0);
    }
}
