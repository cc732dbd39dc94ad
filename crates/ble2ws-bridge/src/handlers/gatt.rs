//! GATT handlers: discovery, characteristic and descriptor I/O, notifications.

use ble2ws_core::BridgeError;
use ble2ws_core::gatt::WriteMode;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use super::Reply;
use crate::command::{CharTarget, DescTarget};
use crate::context::BridgeContext;

/// Cached tree; never touches the radio.
pub fn services(ctx: &BridgeContext, address: &str) -> Result<Reply, BridgeError> {
    ctx.devices.services(address).map(Reply::value)
}

/// DISCOVER_SERVICES.
#[instrument(skip(ctx), fields(command = "DISCOVER_SERVICES"))]
pub async fn discover_services(ctx: &BridgeContext, address: &str) -> Result<Reply, BridgeError> {
    ctx.devices.discover_services(address).await.map(Reply::value)
}

/// DISCOVER_CHARACTERISTICS.
#[instrument(skip(ctx), fields(command = "DISCOVER_CHARACTERISTICS"))]
pub async fn discover_characteristics(
    ctx: &BridgeContext,
    address: &str,
    service: Option<Uuid>,
) -> Result<Reply, BridgeError> {
    ctx.devices
        .discover_characteristics(address, service)
        .await
        .map(Reply::value)
}

/// DISCOVER_DESCRIPTORS.
#[instrument(skip(ctx), fields(command = "DISCOVER_DESCRIPTORS"))]
pub async fn discover_descriptors(
    ctx: &BridgeContext,
    address: &str,
    service: Option<Uuid>,
    characteristic: Option<Uuid>,
) -> Result<Reply, BridgeError> {
    ctx.devices
        .discover_descriptors(address, service, characteristic)
        .await
        .map(Reply::value)
}

/// READ_GATT_CHAR.
#[instrument(skip(ctx), fields(command = "READ_GATT_CHAR"))]
pub async fn read_characteristic(ctx: &BridgeContext, address: &str, target: &CharTarget) -> Result<Reply, BridgeError> {
    let value = ctx.devices.read_characteristic(address, target).await?;
    Ok(Reply::value(json!({ "value": hex::encode(value) })))
}

/// WRITE_GATT_CHAR.
#[instrument(skip(ctx, value), fields(command = "WRITE_GATT_CHAR", len = value.len()))]
pub async fn write_characteristic(
    ctx: &BridgeContext,
    address: &str,
    target: &CharTarget,
    value: &[u8],
    mode: WriteMode,
) -> Result<Reply, BridgeError> {
    ctx.devices
        .write_characteristic(address, target, value, mode)
        .await?;
    Ok(Reply::empty())
}

/// START_NOTIFY.
#[instrument(skip(ctx), fields(command = "START_NOTIFY"))]
pub async fn start_notify(
    ctx: &BridgeContext,
    client_id: &str,
    address: &str,
    target: &CharTarget,
) -> Result<Reply, BridgeError> {
    ctx.devices.start_notify(client_id, address, target).await?;
    Ok(Reply::empty())
}

/// STOP_NOTIFY.
#[instrument(skip(ctx), fields(command = "STOP_NOTIFY"))]
pub async fn stop_notify(
    ctx: &BridgeContext,
    client_id: &str,
    address: &str,
    target: &CharTarget,
) -> Result<Reply, BridgeError> {
    ctx.devices.stop_notify(client_id, address, target).await?;
    Ok(Reply::empty())
}

/// READ_GATT_DESCRIPTOR.
#[instrument(skip(ctx), fields(command = "READ_GATT_DESCRIPTOR"))]
pub async fn read_descriptor(ctx: &BridgeContext, address: &str, target: &DescTarget) -> Result<Reply, BridgeError> {
    let value = ctx.devices.read_descriptor(address, target).await?;
    Ok(Reply::value(json!({ "value": hex::encode(value) })))
}

/// WRITE_GATT_DESCRIPTOR.
#[instrument(skip(ctx, value), fields(command = "WRITE_GATT_DESCRIPTOR", len = value.len()))]
pub async fn write_descriptor(
    ctx: &BridgeContext,
    address: &str,
    target: &DescTarget,
    value: &[u8],
) -> Result<Reply, BridgeError> {
    ctx.devices.write_descriptor(address, target, value).await?;
    Ok(Reply::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::device;
    use crate::handlers::test_helpers::make_test_context;
    use assert_matches::assert_matches;
    use ble2ws_core::sim::DEMO_SENSOR_ADDRESS;
    use ble2ws_core::uuids;
    use std::time::Duration;

    const ADDR: &str = DEMO_SENSOR_ADDRESS;

    fn battery_level() -> CharTarget {
        CharTarget {
            service: None,
            characteristic: uuids::from_short(0x2a19),
        }
    }

    #[tokio::test]
    async fn discovery_levels_build_tree() {
        let (_sim, ctx) = make_test_context();
        let _ = device::connect(&ctx, "a", ADDR, Duration::from_secs(1)).await.unwrap();

        let reply = discover_services(&ctx, ADDR).await.unwrap();
        let tree = reply.result.unwrap();
        assert_eq!(tree["address"], ADDR);
        let battery_key = uuids::from_short(0x180f).to_string();
        assert!(tree["services"][&battery_key].get("characteristics").is_none());

        let reply = discover_characteristics(&ctx, ADDR, Some(uuids::from_short(0x180f)))
            .await
            .unwrap();
        let tree = reply.result.unwrap();
        let level = &tree["services"][&battery_key]["characteristics"][uuids::from_short(0x2a19).to_string()];
        assert_eq!(level["property_names"], json!(["read", "notify"]));

        let reply = services(&ctx, ADDR).unwrap();
        assert_eq!(reply.result.unwrap()["mtu_size"], 185);
    }

    #[tokio::test]
    async fn read_returns_hex() {
        let (_sim, ctx) = make_test_context();
        let _ = device::connect(&ctx, "a", ADDR, Duration::from_secs(1)).await.unwrap();
        let _ = discover_services(&ctx, ADDR).await.unwrap();
        let _ = discover_characteristics(&ctx, ADDR, None).await.unwrap();
        let reply = read_characteristic(&ctx, ADDR, &battery_level()).await.unwrap();
        assert_eq!(reply.result.unwrap(), json!({"value": "64"}));
    }

    #[tokio::test]
    async fn read_not_readable_is_validation_error() {
        let (_sim, ctx) = make_test_context();
        let _ = device::connect(&ctx, "a", ADDR, Duration::from_secs(1)).await.unwrap();
        let _ = discover_services(&ctx, ADDR).await.unwrap();
        let _ = discover_characteristics(&ctx, ADDR, None).await.unwrap();
        let target = CharTarget {
            service: None,
            characteristic: uuids::from_short(0x2a39),
        };
        assert_matches!(
            read_characteristic(&ctx, ADDR, &target).await,
            Err(BridgeError::Validation { .. })
        );
    }

    #[tokio::test]
    async fn services_requires_connection() {
        let (_sim, ctx) = make_test_context();
        assert_matches!(services(&ctx, ADDR), Err(BridgeError::Connection { .. }));
    }
}
