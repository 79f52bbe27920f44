use super::*;
use std::{
    collections::{HashMap, VecDeque},
    sync::{atomic::AtomicUsize, Mutex as StdMutex},
};
use tokio::{sync::mpsc, time::timeout};

const FAST_POLL: Duration = Duration::from_millis(5);

struct FakeRemote {
    login_code: i32,
    dirty: StdMutex<VecDeque<i32>>,
    parameters: StdMutex<HashMap<String, f32>>,
    set_code: i32,
    logouts: AtomicUsize,
}

impl FakeRemote {
    fn new(login_code: i32, dirty: impl IntoIterator<Item = i32>) -> Arc<Self> {
        Self::with_set_code(login_code, dirty, 0)
    }

    fn with_set_code(
        login_code: i32,
        dirty: impl IntoIterator<Item = i32>,
        set_code: i32,
    ) -> Arc<Self> {
        Arc::new(Self {
            login_code,
            dirty: StdMutex::new(dirty.into_iter().collect()),
            parameters: StdMutex::new(HashMap::new()),
            set_code,
            logouts: AtomicUsize::new(0),
        })
    }
}

impl RemoteApi for FakeRemote {
    fn login(&self) -> i32 {
        self.login_code
    }

    fn logout(&self) -> i32 {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn is_parameters_dirty(&self) -> i32 {
        self.dirty.lock().expect("lock").pop_front().unwrap_or(0)
    }

    fn get_parameter_float(&self, name: &CStr) -> Result<f32, i32> {
        let name = name.to_str().expect("utf8");
        self.parameters
            .lock()
            .expect("lock")
            .get(name)
            .copied()
            .ok_or(-3)
    }

    fn set_parameter_float(&self, name: &CStr, value: f32) -> i32 {
        if self.set_code == 0 {
            let name = name.to_str().expect("utf8").to_string();
            self.parameters.lock().expect("lock").insert(name, value);
        }
        self.set_code
    }
}

type Pushes = mpsc::UnboundedReceiver<Option<MixerNotification>>;

fn recording_notifier() -> (DeviceNotifier<MixerNotification>, Pushes) {
    let (tx, rx) = mpsc::unbounded_channel();
    let on_close = tx.clone();
    let notifier = DeviceNotifier::new(
        move |notification| {
            let _ = tx.send(Some(notification));
        },
        move || {
            let _ = on_close.send(None);
        },
    );
    (notifier, rx)
}

async fn next_push(rx: &mut Pushes) -> Option<MixerNotification> {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("push in time")
        .expect("notifier alive")
}

#[test]
fn strip_gain_parameter_uses_indexed_name() {
    assert_eq!(strip_gain_parameter(0), "Strip[0].Gain");
    assert_eq!(strip_gain_parameter(7), "Strip[7].Gain");
}

#[tokio::test]
async fn failed_login_is_unreachable() {
    let remote = FakeRemote::new(-1, []);
    let (notifier, _pushes) = recording_notifier();

    let err = VoicemeeterLink::start(remote.clone(), FAST_POLL, notifier)
        .err()
        .expect("login should fail");
    assert!(matches!(err, DeviceError::Unreachable(_)));
    assert_eq!(remote.logouts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn login_before_application_starts_is_accepted() {
    let remote = FakeRemote::new(1, []);
    let (notifier, _pushes) = recording_notifier();

    VoicemeeterLink::start(remote, FAST_POLL, notifier).expect("login");
}

#[tokio::test]
async fn gain_round_trips_through_strip_parameter() {
    let remote = FakeRemote::new(0, []);
    let (notifier, _pushes) = recording_notifier();
    let link = VoicemeeterLink::start(remote.clone(), FAST_POLL, notifier).expect("login");

    link.set_strip_gain(2, -6.5).await.expect("set");
    assert_eq!(
        remote.parameters.lock().expect("lock").get("Strip[2].Gain"),
        Some(&-6.5)
    );
    assert_eq!(link.strip_gain(2).await.expect("get"), -6.5);

    let err = link.strip_gain(3).await.expect_err("unknown");
    assert_eq!(
        err,
        DeviceError::RequestFailed {
            code: -3,
            comment: "unknown parameter".into(),
        }
    );
}

#[tokio::test]
async fn rejected_write_surfaces_status_code() {
    let remote = FakeRemote::with_set_code(0, [], -2);
    let (notifier, _pushes) = recording_notifier();
    let link = VoicemeeterLink::start(remote, FAST_POLL, notifier).expect("login");

    let err = link.set_strip_gain(0, 0.0).await.expect_err("should fail");
    assert!(matches!(err, DeviceError::RequestFailed { code: -2, .. }));
}

#[tokio::test]
async fn dirty_flag_becomes_notification_and_lost_server_closes() {
    let remote = FakeRemote::new(0, [0, 1, 0, -2]);
    let (notifier, mut pushes) = recording_notifier();
    let _link = VoicemeeterLink::start(remote, FAST_POLL, notifier).expect("login");

    assert_eq!(
        next_push(&mut pushes).await,
        Some(MixerNotification::ParametersChanged)
    );
    assert_eq!(next_push(&mut pushes).await, None);
}

#[tokio::test]
async fn close_logs_out_once_and_stops_polling() {
    let remote = FakeRemote::new(0, []);
    let (notifier, mut pushes) = recording_notifier();
    let link = VoicemeeterLink::start(remote.clone(), FAST_POLL, notifier).expect("login");

    link.close().await;
    remote.dirty.lock().expect("lock").extend([1, 1, 1]);
    drop(link);

    tokio::time::sleep(FAST_POLL * 6).await;
    assert!(pushes.try_recv().is_err());
    assert_eq!(remote.logouts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_library_is_unreachable() {
    let connector = VoicemeeterConnector::new(
        "/nonexistent/VoicemeeterRemote64.dll",
        DEFAULT_POLL_INTERVAL,
    );
    let (notifier, _pushes) = recording_notifier();

    let err = connector
        .open(notifier)
        .await
        .err()
        .expect("load should fail");
    assert!(matches!(err, DeviceError::Unreachable(_)));
}
