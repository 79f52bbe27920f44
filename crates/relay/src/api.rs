use std::sync::Arc;

use compositor::{CompositorController, SceneItemError};
use mixer::MixerController;
use shared::{
    domain::{DeviceKind, ItemVisibility, SceneDescriptor, StripGain},
    error::{ApiError, ErrorCode},
    protocol::{DeviceStatus, HealthReport},
};

#[derive(Clone)]
pub struct ApiContext {
    pub compositor: Arc<CompositorController>,
    pub mixer: Option<Arc<MixerController>>,
}

pub async fn list_scenes(ctx: &ApiContext) -> Vec<SceneDescriptor> {
    ctx.compositor.get_scenes().await
}

/// Healthy means the compositor is connected; the mixer is reported but
/// optional.
pub async fn health(ctx: &ApiContext) -> Result<HealthReport, ApiError> {
    if !ctx.compositor.is_connected() {
        return Err(ApiError::unavailable("compositor is not connected"));
    }
    let mut devices = vec![DeviceStatus {
        device: DeviceKind::Compositor,
        connected: true,
    }];
    if let Some(mixer) = &ctx.mixer {
        devices.push(DeviceStatus {
            device: DeviceKind::Mixer,
            connected: mixer.is_connected(),
        });
    }
    Ok(HealthReport {
        status: "ok".to_string(),
        devices,
    })
}

pub async fn item_visibility(
    ctx: &ApiContext,
    scene_name: &str,
    item_name: &str,
) -> Result<ItemVisibility, ApiError> {
    ensure_names(scene_name, item_name)?;
    ctx.compositor
        .read_item_enabled(scene_name, item_name)
        .await
        .map(ItemVisibility::from_enabled)
        .map_err(scene_item_error)
}

pub async fn set_item_visibility(
    ctx: &ApiContext,
    scene_name: &str,
    item_name: &str,
    enabled: bool,
) -> Result<(), ApiError> {
    ensure_names(scene_name, item_name)?;
    ctx.compositor
        .write_item_enabled(scene_name, item_name, enabled)
        .await
        .map_err(scene_item_error)
}

pub async fn strip_gain(ctx: &ApiContext, strip_index: u32) -> Result<StripGain, ApiError> {
    let mixer = ctx
        .mixer
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("mixer is not configured"))?;
    if !mixer.is_connected() {
        return Err(ApiError::unavailable("mixer is not connected"));
    }
    let gain = mixer
        .get_strip_gain(strip_index)
        .await
        .ok_or_else(|| ApiError::not_found(format!("strip {strip_index} has no gain")))?;
    Ok(StripGain { strip_index, gain })
}

fn ensure_names(scene_name: &str, item_name: &str) -> Result<(), ApiError> {
    if scene_name.trim().is_empty() || item_name.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "scene and item names must not be empty",
        ));
    }
    Ok(())
}

/// Only a failed lookup is a 404; device faults surface as internal errors.
fn scene_item_error(error: SceneItemError) -> ApiError {
    match error {
        SceneItemError::NotConnected => ApiError::unavailable(error.to_string()),
        SceneItemError::NotFound { .. } => ApiError::not_found(error.to_string()),
        SceneItemError::Device(device) => ApiError::new(
            ErrorCode::Internal,
            format!("compositor request failed: {device}"),
        ),
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
