//! Link handlers: CONNECT, DISCONNECT, PAIR, UNPAIR.

use std::time::Duration;

use ble2ws_core::{BridgeError, Event, MessageType};
use serde_json::json;
use tracing::instrument;

use super::Reply;
use crate::context::BridgeContext;

/// Reason attached to DID_DISCONNECT after a DISCONNECT command.
pub const REASON_REQUESTED: &str = "requested";
/// Reason attached to DID_DISCONNECT after the adapter reported link loss.
pub const REASON_LINK_LOST: &str = "link_lost";

/// Open or join a link. The caller also receives DID_CONNECT_PERIPHERAL.
#[instrument(skip(ctx), fields(command = "CONNECT"))]
pub async fn connect(
    ctx: &BridgeContext,
    client_id: &str,
    address: &str,
    timeout: Duration,
) -> Result<Reply, BridgeError> {
    let cached = ctx.scan.cached(address);
    let connected = ctx.devices.connect(client_id, address, timeout, cached).await?;
    let event = Event::new(MessageType::DidConnectPeripheral, connected.peripheral.clone());
    Ok(Reply::value(connected.peripheral).with_event(vec![client_id.to_owned()], event))
}

/// Close a link and tell every interested client.
#[instrument(skip(ctx), fields(command = "DISCONNECT"))]
pub async fn disconnect(ctx: &BridgeContext, client_id: &str, address: &str) -> Result<Reply, BridgeError> {
    let recipients = ctx.devices.disconnect(client_id, address).await?;
    Ok(Reply::empty().with_event(recipients, disconnected(address, REASON_REQUESTED)))
}

/// Pair.
#[instrument(skip(ctx), fields(command = "PAIR"))]
pub async fn pair(ctx: &BridgeContext, address: &str) -> Result<Reply, BridgeError> {
    ctx.devices.pair(address).await?;
    Ok(Reply::empty())
}

/// Remove pairing.
#[instrument(skip(ctx), fields(command = "UNPAIR"))]
pub async fn unpair(ctx: &BridgeContext, address: &str) -> Result<Reply, BridgeError> {
    ctx.devices.unpair(address).await?;
    Ok(Reply::empty())
}

/// DID_DISCONNECT_PERIPHERAL event.
pub fn disconnected(address: &str, reason: &str) -> Event {
    Event::new(
        MessageType::DidDisconnectPeripheral,
        json!({ "address": address, "reason": reason }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_helpers::make_test_context;
    use assert_matches::assert_matches;
    use ble2ws_core::sim::{DEMO_SENSOR_ADDRESS, DEMO_THERMO_ADDRESS};

    const ADDR: &str = DEMO_SENSOR_ADDRESS;

    #[tokio::test]
    async fn connect_reports_link() {
        let (_sim, ctx) = make_test_context();
        let reply = connect(&ctx, "a", ADDR, Duration::from_secs(1)).await.unwrap();
        let result = reply.result.unwrap();
        assert_eq!(result["address"], ADDR);
        assert_eq!(result["name"], "Sensor1");
        assert_eq!(result["state"], 1);
        assert_eq!(result["already_connected"], false);
    }

    #[tokio::test]
    async fn second_connect_joins() {
        let (_sim, ctx) = make_test_context();
        let _ = connect(&ctx, "a", ADDR, Duration::from_secs(1)).await.unwrap();
        let reply = connect(&ctx, "b", ADDR, Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.result.unwrap()["already_connected"], true);
        assert_eq!(reply.events[0].recipients, vec!["b"]);
    }

    #[tokio::test]
    async fn disconnect_reason_requested() {
        let (_sim, ctx) = make_test_context();
        let _ = connect(&ctx, "a", ADDR, Duration::from_secs(1)).await.unwrap();
        let reply = disconnect(&ctx, "a", ADDR).await.unwrap();
        assert!(reply.result.is_none());
        let delivery = &reply.events[0];
        assert_eq!(delivery.recipients, vec!["a"]);
        assert_eq!(delivery.event.payload["reason"], "requested");
    }

    #[tokio::test]
    async fn disconnect_unknown_is_connection_error() {
        let (_sim, ctx) = make_test_context();
        assert_matches!(
            disconnect(&ctx, "a", ADDR).await,
            Err(BridgeError::Connection { .. })
        );
    }

    #[tokio::test]
    async fn pair_requiring_passkey_is_permission_error() {
        let (_sim, ctx) = make_test_context();
        let _ = pair(&ctx, ADDR).await.unwrap();
        let _ = unpair(&ctx, ADDR).await.unwrap();
        assert_matches!(
            pair(&ctx, DEMO_THERMO_ADDRESS).await,
            Err(BridgeError::Permission { .. })
        );
    }
}
