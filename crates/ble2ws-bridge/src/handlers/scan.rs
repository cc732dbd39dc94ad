//! Scan handlers: START_SCAN, STOP_SCAN, DISCOVER, FIND_DEVICE_BY_*.

use std::time::Duration;

use ble2ws_core::BridgeError;
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use super::Reply;
use crate::context::BridgeContext;
use crate::scan::FindTarget;

/// Begin a continuous scan owned by the caller.
#[instrument(skip(ctx, service_uuids), fields(command = "START_SCAN"))]
pub async fn start_scan(ctx: &BridgeContext, client_id: &str, service_uuids: Vec<Uuid>) -> Result<Reply, BridgeError> {
    ctx.scan.start_scan(client_id, service_uuids).await?;
    Ok(Reply::empty())
}

/// End the caller's continuous scan.
#[instrument(skip(ctx), fields(command = "STOP_SCAN"))]
pub async fn stop_scan(ctx: &BridgeContext, client_id: &str) -> Result<Reply, BridgeError> {
    ctx.scan.stop_scan(client_id).await?;
    Ok(Reply::empty())
}

/// Bounded scan returning every peripheral seen.
#[instrument(skip(ctx, service_uuids), fields(command = "DISCOVER"))]
pub async fn discover(
    ctx: &BridgeContext,
    client_id: &str,
    timeout: Duration,
    return_adv: bool,
    service_uuids: Vec<Uuid>,
) -> Result<Reply, BridgeError> {
    let records = ctx.scan.discover(client_id, timeout, service_uuids).await?;
    Ok(Reply::value(Value::Array(
        records.iter().map(|r| r.to_json(return_adv)).collect(),
    )))
}

/// Bounded scan for an exact name.
#[instrument(skip(ctx), fields(command = "FIND_DEVICE_BY_NAME"))]
pub async fn find_by_name(
    ctx: &BridgeContext,
    client_id: &str,
    name: String,
    timeout: Duration,
) -> Result<Reply, BridgeError> {
    let record = ctx.scan.find(client_id, timeout, FindTarget::Name(name)).await?;
    Ok(Reply::value(record.to_json(false)))
}

/// Bounded scan for an address.
#[instrument(skip(ctx), fields(command = "FIND_DEVICE_BY_ADDRESS"))]
pub async fn find_by_address(
    ctx: &BridgeContext,
    client_id: &str,
    address: String,
    timeout: Duration,
) -> Result<Reply, BridgeError> {
    let record = ctx.scan.find(client_id, timeout, FindTarget::Address(address)).await?;
    Ok(Reply::value(record.to_json(false)))
}
