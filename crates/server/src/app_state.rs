use std::sync::Arc;

use compositor::CompositorController;
use mixer::MixerController;
use relay::{ApiContext, GainBroadcastPolicy, RelayHub};

pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) hub: RelayHub,
}

impl AppState {
    pub(crate) fn new(
        compositor: Arc<CompositorController>,
        mixer: Option<Arc<MixerController>>,
        gain_policy: GainBroadcastPolicy,
    ) -> Self {
        let hub = RelayHub::new(Arc::clone(&compositor), mixer.clone(), gain_policy);
        Self {
            api: ApiContext { compositor, mixer },
            hub,
        }
    }
}
