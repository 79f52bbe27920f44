use super::*;
use crate::support::{compositor_for, mixer_for, FakeMixer, FakeObs};
use std::{collections::HashMap, sync::atomic::Ordering};

fn scene(scene_index: i64, scene_name: &str) -> SceneDescriptor {
    SceneDescriptor {
        scene_index,
        scene_name: scene_name.into(),
        scene_uuid: format!("u-{scene_index}"),
    }
}

fn studio() -> Arc<FakeObs> {
    let obs = FakeObs::default();
    *obs.scenes.lock().expect("lock") = vec![scene(0, "Main"), scene(1, "Standby")];
    *obs.items.lock().expect("lock") = HashMap::from([
        ("Camera".to_string(), (1, true)),
        ("Overlay".to_string(), (2, false)),
    ]);
    Arc::new(obs)
}

fn context(obs: &Arc<FakeObs>, mixer: Option<&Arc<FakeMixer>>) -> ApiContext {
    ApiContext {
        compositor: compositor_for(obs),
        mixer: mixer.map(mixer_for),
    }
}

#[tokio::test]
async fn health_requires_compositor() {
    let obs = studio();
    let mixer = Arc::new(FakeMixer::default());
    let ctx = context(&obs, Some(&mixer));

    let err = health(&ctx).await.expect_err("disconnected");
    assert_eq!(err.code, ErrorCode::Unavailable);

    assert!(ctx.compositor.connect(false).await);
    let report = health(&ctx).await.expect("healthy");
    assert_eq!(report.status, "ok");
    assert_eq!(
        report.devices,
        vec![
            DeviceStatus {
                device: DeviceKind::Compositor,
                connected: true,
            },
            DeviceStatus {
                device: DeviceKind::Mixer,
                connected: false,
            },
        ]
    );
}

#[tokio::test]
async fn scenes_are_listed_newest_first() {
    let obs = studio();
    let ctx = context(&obs, None);
    assert!(list_scenes(&ctx).await.is_empty());

    assert!(ctx.compositor.connect(false).await);
    let names: Vec<_> = list_scenes(&ctx)
        .await
        .into_iter()
        .map(|scene| scene.scene_name)
        .collect();
    assert_eq!(names, vec!["Standby", "Main"]);
}

#[tokio::test]
async fn item_visibility_maps_missing_items_to_not_found() {
    let obs = studio();
    let ctx = context(&obs, None);

    let err = item_visibility(&ctx, "Main", "Camera")
        .await
        .expect_err("disconnected");
    assert_eq!(err.code, ErrorCode::Unavailable);

    assert!(ctx.compositor.connect(false).await);
    assert_eq!(
        item_visibility(&ctx, "Main", "Camera").await.expect("camera"),
        ItemVisibility::Enabled
    );
    assert_eq!(
        item_visibility(&ctx, "Main", "Overlay")
            .await
            .expect("overlay"),
        ItemVisibility::Disabled
    );
    let err = item_visibility(&ctx, "Main", "Ghost")
        .await
        .expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);

    let err = item_visibility(&ctx, " ", "Camera")
        .await
        .expect_err("blank scene");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn set_item_visibility_updates_the_item() {
    let obs = studio();
    let ctx = context(&obs, None);
    assert!(ctx.compositor.connect(false).await);

    set_item_visibility(&ctx, "Main", "Overlay", true)
        .await
        .expect("set");
    assert_eq!(
        obs.calls(),
        vec!["set_scene_item_enabled Main 2 true"]
    );

    let err = set_item_visibility(&ctx, "Main", "Ghost", true)
        .await
        .expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn device_faults_on_a_found_item_are_internal_errors() {
    let obs = studio();
    let ctx = context(&obs, None);
    assert!(ctx.compositor.connect(false).await);
    obs.failing.store(true, Ordering::SeqCst);

    let err = item_visibility(&ctx, "Main", "Camera")
        .await
        .expect_err("read fails");
    assert_eq!(err.code, ErrorCode::Internal);

    let err = set_item_visibility(&ctx, "Main", "Camera", false)
        .await
        .expect_err("write fails");
    assert_eq!(err.code, ErrorCode::Internal);

    let err = item_visibility(&ctx, "Main", "Ghost")
        .await
        .expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn strip_gain_needs_a_connected_mixer() {
    let obs = studio();
    let err = strip_gain(&context(&obs, None), 0)
        .await
        .expect_err("no mixer");
    assert_eq!(err.code, ErrorCode::Unavailable);

    let mixer = Arc::new(FakeMixer::default());
    let ctx = context(&obs, Some(&mixer));
    let err = strip_gain(&ctx, 0).await.expect_err("disconnected");
    assert_eq!(err.code, ErrorCode::Unavailable);

    let controller = ctx.mixer.clone().expect("mixer");
    assert!(controller.connect(false).await);
    mixer.gains.lock().expect("lock").insert(1, -4.0);
    assert_eq!(
        strip_gain(&ctx, 1).await.expect("gain"),
        StripGain {
            strip_index: 1,
            gain: -4.0,
        }
    );
    let err = strip_gain(&ctx, 9).await.expect_err("unknown strip");
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(mixer.opens.load(Ordering::SeqCst), 1);
}
