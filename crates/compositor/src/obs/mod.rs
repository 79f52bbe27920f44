//! obs-websocket v5 client.
//!
//! One [`ObsLink`] per identified session. Requests are matched to responses
//! by a random request id; a background reader task resolves them and
//! forwards scene pushes to the session notifier.

pub mod protocol;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use async_trait::async_trait;
use device_session::{DeviceError, DeviceLink, DeviceNotifier};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use shared::domain::{ProgramScene, SceneDescriptor, SceneItem};
use tokio::{
    net::TcpStream,
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::{CompositorConnector, CompositorLink, CompositorNotification};
use protocol::{
    authentication_string, decode, encode, Envelope, Event, Hello, Identified, Identify, OpCode,
    ProgramSceneChangedData, Request, RequestResponse, SceneItemEnabledData, SceneItemListData,
    SceneListData, CLOSE_AUTHENTICATION_FAILED, EVENT_SUBSCRIPTION_SCENES, RPC_VERSION,
};

type ObsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ObsWriter = SplitSink<ObsStream, Message>;
type ObsReader = SplitStream<ObsStream>;
type PendingRequests = Arc<StdMutex<HashMap<String, oneshot::Sender<Result<Value, DeviceError>>>>>;

const CURRENT_PROGRAM_SCENE_CHANGED: &str = "CurrentProgramSceneChanged";

#[derive(Debug, Clone)]
pub struct ObsConnector {
    url: String,
    password: Option<String>,
}

impl ObsConnector {
    pub fn new(url: impl Into<String>, password: Option<String>) -> Self {
        Self {
            url: url.into(),
            password: password.filter(|password| !password.is_empty()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CompositorConnector for ObsConnector {
    async fn open(
        &self,
        notifier: DeviceNotifier<CompositorNotification>,
    ) -> Result<Arc<dyn CompositorLink>, DeviceError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| DeviceError::Unreachable(format!("{}: {err}", self.url)))?;
        let (mut writer, mut reader) = stream.split();
        identify(&mut writer, &mut reader, self.password.as_deref()).await?;
        info!(url = %self.url, "obs-websocket session identified");
        Ok(ObsLink::spawn(writer, reader, notifier))
    }
}

async fn identify(
    writer: &mut ObsWriter,
    reader: &mut ObsReader,
    password: Option<&str>,
) -> Result<(), DeviceError> {
    let hello: Hello = expect_op(reader, OpCode::Hello).await?;
    debug!(
        version = hello.obs_web_socket_version.as_deref().unwrap_or("unknown"),
        rpc_version = hello.rpc_version,
        "obs-websocket hello"
    );

    let authentication = match (&hello.authentication, password) {
        (Some(challenge), Some(password)) => Some(authentication_string(
            password,
            &challenge.salt,
            &challenge.challenge,
        )),
        (Some(_), None) => {
            return Err(DeviceError::AuthenticationRejected(
                "server requires a password but none is configured".into(),
            ))
        }
        (None, _) => None,
    };

    let identify = encode(
        OpCode::Identify,
        &Identify {
            rpc_version: RPC_VERSION,
            authentication,
            event_subscriptions: EVENT_SUBSCRIPTION_SCENES,
        },
    )?;
    writer
        .send(Message::Text(identify))
        .await
        .map_err(|err| DeviceError::Handshake(err.to_string()))?;

    let identified: Identified = expect_op(reader, OpCode::Identified).await?;
    debug!(
        rpc_version = identified.negotiated_rpc_version,
        "obs-websocket identified"
    );
    Ok(())
}

async fn expect_op<T: DeserializeOwned>(
    reader: &mut ObsReader,
    expected: OpCode,
) -> Result<T, DeviceError> {
    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => {
                let envelope = decode(&text)?;
                if envelope.op_code() != Some(expected) {
                    return Err(DeviceError::Handshake(format!(
                        "expected op {}, got op {}",
                        expected as u8, envelope.op
                    )));
                }
                return envelope.data();
            }
            Some(Ok(Message::Close(frame))) => return Err(close_error(frame.as_ref())),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(DeviceError::Handshake(err.to_string())),
            None => return Err(DeviceError::Closed),
        }
    }
}

fn close_error(frame: Option<&CloseFrame<'_>>) -> DeviceError {
    match frame {
        Some(frame) if u16::from(frame.code) == CLOSE_AUTHENTICATION_FAILED => {
            DeviceError::AuthenticationRejected(frame.reason.to_string())
        }
        Some(frame) => DeviceError::Handshake(format!(
            "closed with code {}: {}",
            u16::from(frame.code),
            frame.reason
        )),
        None => DeviceError::Closed,
    }
}

pub struct ObsLink {
    writer: Mutex<ObsWriter>,
    pending: PendingRequests,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
}

impl ObsLink {
    fn spawn(
        writer: ObsWriter,
        reader: ObsReader,
        notifier: DeviceNotifier<CompositorNotification>,
    ) -> Arc<Self> {
        let pending: PendingRequests = Arc::default();
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&pending), notifier));
        Arc::new(Self {
            writer: Mutex::new(writer),
            pending,
            reader_task: StdMutex::new(Some(reader_task)),
        })
    }

    async fn call(&self, request_type: &str, request_data: Option<Value>) -> Result<Value, DeviceError> {
        let request_id = Uuid::new_v4().to_string();
        let text = encode(
            OpCode::Request,
            &Request {
                request_type,
                request_id: &request_id,
                request_data,
            },
        )?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id.clone(), tx);

        let sent = self.writer.lock().await.send(Message::Text(text)).await;
        if let Err(err) = sent {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&request_id);
            debug!(request_type, error = %err, "request not sent");
            return Err(DeviceError::Closed);
        }

        rx.await.unwrap_or(Err(DeviceError::Closed))
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        request_type: &str,
        request_data: Option<Value>,
    ) -> Result<T, DeviceError> {
        let value = self.call(request_type, request_data).await?;
        serde_json::from_value(value).map_err(|err| {
            DeviceError::Protocol(format!("malformed {request_type} response: {err}"))
        })
    }

    fn stop_reader(&self) {
        if let Some(task) = self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for ObsLink {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

#[async_trait]
impl DeviceLink for ObsLink {
    async fn close(&self) {
        if let Err(error) = self.writer.lock().await.close().await {
            debug!(%error, "obs-websocket close handshake failed");
        }
        self.stop_reader();
        fail_pending(&self.pending);
    }
}

#[async_trait]
impl CompositorLink for ObsLink {
    async fn scene_list(&self) -> Result<Vec<SceneDescriptor>, DeviceError> {
        let data: SceneListData = self.call_as("GetSceneList", None).await?;
        Ok(data
            .scenes
            .into_iter()
            .map(|scene| SceneDescriptor {
                scene_index: scene.scene_index,
                scene_name: scene.scene_name,
                scene_uuid: scene.scene_uuid,
            })
            .collect())
    }

    async fn scene_items(&self, scene_name: &str) -> Result<Vec<SceneItem>, DeviceError> {
        let data: SceneItemListData = self
            .call_as("GetSceneItemList", Some(json!({ "sceneName": scene_name })))
            .await?;
        Ok(data
            .scene_items
            .into_iter()
            .map(|item| SceneItem {
                scene_item_id: item.scene_item_id,
                source_name: item.source_name,
            })
            .collect())
    }

    async fn set_program_scene(&self, scene_uuid: &str) -> Result<(), DeviceError> {
        self.call(
            "SetCurrentProgramScene",
            Some(json!({ "sceneUuid": scene_uuid })),
        )
        .await
        .map(|_| ())
    }

    async fn scene_item_enabled(
        &self,
        scene_name: &str,
        scene_item_id: i64,
    ) -> Result<bool, DeviceError> {
        let data: SceneItemEnabledData = self
            .call_as(
                "GetSceneItemEnabled",
                Some(json!({ "sceneName": scene_name, "sceneItemId": scene_item_id })),
            )
            .await?;
        Ok(data.scene_item_enabled)
    }

    async fn set_scene_item_enabled(
        &self,
        scene_name: &str,
        scene_item_id: i64,
        enabled: bool,
    ) -> Result<(), DeviceError> {
        self.call(
            "SetSceneItemEnabled",
            Some(json!({
                "sceneName": scene_name,
                "sceneItemId": scene_item_id,
                "sceneItemEnabled": enabled,
            })),
        )
        .await
        .map(|_| ())
    }

    async fn trigger_studio_transition(&self) -> Result<(), DeviceError> {
        self.call("TriggerStudioModeTransition", None)
            .await
            .map(|_| ())
    }
}

async fn read_loop(
    mut reader: ObsReader,
    pending: PendingRequests,
    notifier: DeviceNotifier<CompositorNotification>,
) {
    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(text)) => match decode(&text) {
                Ok(envelope) => dispatch(envelope, &pending, &notifier),
                Err(error) => warn!(%error, "dropping malformed obs-websocket message"),
            },
            Ok(Message::Close(frame)) => {
                info!(?frame, "obs-websocket closed the connection");
                break;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(%error, "obs-websocket read failed");
                break;
            }
        }
    }
    fail_pending(&pending);
    notifier.closed();
}

fn dispatch(
    envelope: Envelope,
    pending: &PendingRequests,
    notifier: &DeviceNotifier<CompositorNotification>,
) {
    match envelope.op_code() {
        Some(OpCode::RequestResponse) => match envelope.data::<RequestResponse>() {
            Ok(response) => resolve(response, pending),
            Err(error) => warn!(%error, "dropping malformed request response"),
        },
        Some(OpCode::Event) => match envelope.data::<Event>() {
            Ok(event) => forward_event(event, notifier),
            Err(error) => warn!(%error, "dropping malformed event"),
        },
        _ => debug!(op = envelope.op, "ignoring obs-websocket message"),
    }
}

fn resolve(response: RequestResponse, pending: &PendingRequests) {
    let waiter = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&response.request_id);
    let Some(waiter) = waiter else {
        debug!(request_id = %response.request_id, "response for unknown request");
        return;
    };

    let status = response.request_status;
    let result = if status.result {
        Ok(response.response_data.unwrap_or(Value::Null))
    } else {
        Err(DeviceError::RequestFailed {
            code: status.code,
            comment: status.comment.unwrap_or_default(),
        })
    };
    let _ = waiter.send(result);
}

fn forward_event(event: Event, notifier: &DeviceNotifier<CompositorNotification>) {
    if event.event_type != CURRENT_PROGRAM_SCENE_CHANGED {
        return;
    }
    let Some(data) = event.event_data else {
        warn!("program scene change without event data");
        return;
    };
    match serde_json::from_value::<ProgramSceneChangedData>(data) {
        Ok(data) => notifier.notify(CompositorNotification::CurrentProgramSceneChanged(
            ProgramScene {
                scene_name: data.scene_name,
                scene_uuid: data.scene_uuid,
            },
        )),
        Err(error) => warn!(%error, "malformed program scene change event"),
    }
}

fn fail_pending(pending: &PendingRequests) {
    let waiters: Vec<_> = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .map(|(_, waiter)| waiter)
        .collect();
    for waiter in waiters {
        let _ = waiter.send(Err(DeviceError::Closed));
    }
}

#[cfg(test)]
#[path = "../tests/obs_tests.rs"]
mod tests;
