use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
};

use async_trait::async_trait;
use compositor::{
    CompositorConnector, CompositorController, CompositorLink, CompositorNotification,
};
use device_session::{DeviceError, DeviceLink, DeviceNotifier};
use mixer::{MixerConnector, MixerController, MixerLink, MixerNotification};
use shared::domain::{SceneDescriptor, SceneItem};

fn rejected() -> DeviceError {
    DeviceError::RequestFailed {
        code: 600,
        comment: "rejected".into(),
    }
}

#[derive(Default)]
pub struct FakeObs {
    pub unreachable: AtomicBool,
    /// Makes the item read and write calls fail after the lookup.
    pub failing: AtomicBool,
    pub opens: AtomicUsize,
    pub scenes: StdMutex<Vec<SceneDescriptor>>,
    /// source name -> (scene item id, enabled)
    pub items: StdMutex<HashMap<String, (i64, bool)>>,
    pub calls: StdMutex<Vec<String>>,
    notifier: StdMutex<Option<DeviceNotifier<CompositorNotification>>>,
}

impl FakeObs {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn notifier(&self) -> DeviceNotifier<CompositorNotification> {
        self.notifier
            .lock()
            .expect("lock")
            .clone()
            .expect("connector was opened")
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("lock").push(call);
    }
}

#[async_trait]
impl DeviceLink for FakeObs {
    async fn close(&self) {}
}

#[async_trait]
impl CompositorLink for FakeObs {
    async fn scene_list(&self) -> Result<Vec<SceneDescriptor>, DeviceError> {
        Ok(self.scenes.lock().expect("lock").clone())
    }

    async fn scene_items(&self, _scene_name: &str) -> Result<Vec<SceneItem>, DeviceError> {
        Ok(self
            .items
            .lock()
            .expect("lock")
            .iter()
            .map(|(source_name, (scene_item_id, _))| SceneItem {
                scene_item_id: *scene_item_id,
                source_name: source_name.clone(),
            })
            .collect())
    }

    async fn set_program_scene(&self, scene_uuid: &str) -> Result<(), DeviceError> {
        self.record(format!("set_program_scene {scene_uuid}"));
        Ok(())
    }

    async fn scene_item_enabled(
        &self,
        _scene_name: &str,
        scene_item_id: i64,
    ) -> Result<bool, DeviceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(rejected());
        }
        self.items
            .lock()
            .expect("lock")
            .values()
            .find(|(id, _)| *id == scene_item_id)
            .map(|(_, enabled)| *enabled)
            .ok_or_else(rejected)
    }

    async fn set_scene_item_enabled(
        &self,
        scene_name: &str,
        scene_item_id: i64,
        enabled: bool,
    ) -> Result<(), DeviceError> {
        self.record(format!(
            "set_scene_item_enabled {scene_name} {scene_item_id} {enabled}"
        ));
        if self.failing.load(Ordering::SeqCst) {
            return Err(rejected());
        }
        for (id, current) in self.items.lock().expect("lock").values_mut() {
            if *id == scene_item_id {
                *current = enabled;
            }
        }
        Ok(())
    }

    async fn trigger_studio_transition(&self) -> Result<(), DeviceError> {
        self.record("trigger_studio_transition".into());
        Ok(())
    }
}

struct FakeObsConnector(Arc<FakeObs>);

#[async_trait]
impl CompositorConnector for FakeObsConnector {
    async fn open(
        &self,
        notifier: DeviceNotifier<CompositorNotification>,
    ) -> Result<Arc<dyn CompositorLink>, DeviceError> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        if self.0.unreachable.load(Ordering::SeqCst) {
            return Err(DeviceError::Unreachable("connection refused".into()));
        }
        *self.0.notifier.lock().expect("lock") = Some(notifier);
        Ok(Arc::clone(&self.0) as Arc<dyn CompositorLink>)
    }
}

#[derive(Default)]
pub struct FakeMixer {
    pub unreachable: AtomicBool,
    pub rejecting: AtomicBool,
    pub opens: AtomicUsize,
    pub gains: StdMutex<HashMap<u32, f32>>,
    notifier: StdMutex<Option<DeviceNotifier<MixerNotification>>>,
}

impl FakeMixer {
    pub fn notifier(&self) -> DeviceNotifier<MixerNotification> {
        self.notifier
            .lock()
            .expect("lock")
            .clone()
            .expect("connector was opened")
    }
}

#[async_trait]
impl DeviceLink for FakeMixer {
    async fn close(&self) {}
}

#[async_trait]
impl MixerLink for FakeMixer {
    async fn set_strip_gain(&self, strip_index: u32, gain: f32) -> Result<(), DeviceError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(rejected());
        }
        self.gains.lock().expect("lock").insert(strip_index, gain);
        Ok(())
    }

    async fn strip_gain(&self, strip_index: u32) -> Result<f32, DeviceError> {
        self.gains
            .lock()
            .expect("lock")
            .get(&strip_index)
            .copied()
            .ok_or_else(rejected)
    }
}

struct FakeMixerConnector(Arc<FakeMixer>);

#[async_trait]
impl MixerConnector for FakeMixerConnector {
    async fn open(
        &self,
        notifier: DeviceNotifier<MixerNotification>,
    ) -> Result<Arc<dyn MixerLink>, DeviceError> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        if self.0.unreachable.load(Ordering::SeqCst) {
            return Err(DeviceError::Unreachable("VBVMR_Login returned -1".into()));
        }
        *self.0.notifier.lock().expect("lock") = Some(notifier);
        Ok(Arc::clone(&self.0) as Arc<dyn MixerLink>)
    }
}

pub fn compositor_for(obs: &Arc<FakeObs>) -> Arc<CompositorController> {
    Arc::new(CompositorController::new(FakeObsConnector(Arc::clone(obs))))
}

pub fn mixer_for(mixer: &Arc<FakeMixer>) -> Arc<MixerController> {
    Arc::new(MixerController::new(FakeMixerConnector(Arc::clone(mixer))))
}
