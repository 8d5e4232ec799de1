//! rosbridge-style WebSocket gateway.
//!
//! [`RosbridgeGateway`] exposes the [`EventBus`] to processes outside the
//! bridge using the JSON framing of `rosbridge_server`, so existing ROS
//! tooling (roslibjs dashboards, `rosbridge` clients) can drive the arm:
//!
//! 1. **Inbound** – `{"op":"publish","topic":"/run_macro","msg":{"data":"wave"}}`
//!    and the equivalent frames for `/run_pose` and `/joint_goals`
//!    (`"msg":{"position":[...]}`) are published on the matching bus topic.
//!
//! 2. **Outbound** – every `joint_states` and `arm_status` event is pushed to
//!    each connected client as a `publish` frame.
//!
//! Anything else a client sends is ignored.

use std::net::SocketAddr;
use std::sync::Arc;

use armbridge_types::{BridgeError, Event, EventPayload, JointState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic};

/// Frames larger than this are dropped without being parsed.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

const SOURCE: &str = "armbridge-middleware::gateway";

/// WebSocket front door to the [`EventBus`].
#[derive(Clone)]
pub struct RosbridgeGateway {
    bus: Arc<EventBus>,
}

impl RosbridgeGateway {
    /// Create a new gateway backed by `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Bind `addr` and serve clients until `shutdown` flips to `true`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Channel`] if the TCP listener cannot be bound.
    pub async fn run(self, addr: SocketAddr, shutdown: watch::Receiver<bool>) -> Result<(), BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Channel(format!("ws bind error on {addr}: {e}")))?;
        info!(%addr, "rosbridge gateway listening");
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Accept clients from an already-bound `listener` until shutdown.
    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let gateway = self.clone();
                        let client_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = gateway.handle_client(stream, peer, client_shutdown).await {
                                error!(peer = %peer, error = %e, "ws client error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "ws accept error"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("rosbridge gateway stopped");
    }

    async fn handle_client(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BridgeError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| BridgeError::Channel(format!("ws handshake from {peer}: {e}")))?;
        info!(peer = %peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut joint_states = self.bus.subscribe_to(Topic::JointStates);
        let mut arm_status = self.bus.subscribe_to(Topic::ArmStatus);

        loop {
            let outbound = tokio::select! {
                result = joint_states.recv() => result,
                result = arm_status.recv() => result,
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            self.handle_incoming_message(text.as_str());
                        }
                        _ => {}
                    }
                    continue;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match outbound {
                Ok(event) => {
                    let Some(frame) = outbound_frame(&event) else {
                        continue;
                    };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(peer = %peer, lagged_by = n, "ws client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!(peer = %peer, "ws client disconnected");
        Ok(())
    }

    /// Parse one client frame and publish it on the bus if it is a command.
    fn handle_incoming_message(&self, text: &str) {
        let Some((topic, payload)) = parse_inbound(text) else {
            debug!(frame = text, "ignoring ws frame");
            return;
        };
        if let Err(e) = self.bus.publish_to(topic, Event::new(SOURCE, payload)) {
            warn!(%topic, error = %e, "dropping ws command");
        }
    }
}

/// Decode a rosbridge `publish` frame aimed at one of the command topics.
///
/// Returns `None` for malformed JSON, other ops, unknown or outbound topics,
/// and payloads of the wrong shape.
pub fn parse_inbound(text: &str) -> Option<(Topic, EventPayload)> {
    if text.len() > MAX_FRAME_BYTES {
        return None;
    }
    let json: Value = serde_json::from_str(text).ok()?;
    if json.get("op")?.as_str()? != "publish" {
        return None;
    }
    let topic = Topic::from_name(json.get("topic")?.as_str()?)?;
    let msg = json.get("msg")?;

    let payload = match topic {
        Topic::RunMacro => EventPayload::RunMacro(msg.get("data")?.as_str()?.to_string()),
        Topic::RunPose => EventPayload::RunPose(msg.get("data")?.as_str()?.to_string()),
        Topic::JointGoals => {
            let position = msg
                .get("position")?
                .as_array()?
                .iter()
                .map(Value::as_f64)
                .collect::<Option<Vec<f64>>>()?;
            EventPayload::JointGoals(JointState::goal(position))
        }
        Topic::JointStates | Topic::ArmStatus => return None,
    };
    Some((topic, payload))
}

/// Encode an outbound bus event as a rosbridge `publish` frame.
pub fn outbound_frame(event: &Event) -> Option<Value> {
    match &event.payload {
        EventPayload::JointStates(state) => Some(json!({
            "op": "publish",
            "topic": format!("/{}", Topic::JointStates.name()),
            "msg": {
                "header": {
                    "stamp": {
                        "sec": state.stamp.timestamp(),
                        "nanosec": state.stamp.timestamp_subsec_nanos(),
                    }
                },
                "name": state.name,
                "position": state.position,
            },
        })),
        EventPayload::ArmStatus(status) => Some(json!({
            "op": "publish",
            "topic": format!("/{}", Topic::ArmStatus.name()),
            "msg": { "data": status.as_str() },
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armbridge_types::{ArmStatus, JointAngles};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn make_gateway() -> (Arc<EventBus>, RosbridgeGateway) {
        let bus = Arc::new(EventBus::default());
        let gateway = RosbridgeGateway::new(Arc::clone(&bus));
        (bus, gateway)
    }

    #[test]
    fn parse_run_macro() {
        let (topic, payload) =
            parse_inbound(r#"{"op":"publish","topic":"/run_macro","msg":{"data":"wave"}}"#).unwrap();
        assert_eq!(topic, Topic::RunMacro);
        assert!(matches!(payload, EventPayload::RunMacro(ref name) if name == "wave"));
    }

    #[test]
    fn parse_run_pose_without_slash() {
        let (topic, payload) =
            parse_inbound(r#"{"op":"publish","topic":"run_pose","msg":{"data":"home"}}"#).unwrap();
        assert_eq!(topic, Topic::RunPose);
        assert!(matches!(payload, EventPayload::RunPose(ref name) if name == "home"));
    }

    #[test]
    fn parse_joint_goals_keeps_every_position() {
        let (topic, payload) = parse_inbound(
            r#"{"op":"publish","topic":"/joint_goals","msg":{"name":[],"position":[0.0,0.5,-1.0]}}"#,
        )
        .unwrap();
        assert_eq!(topic, Topic::JointGoals);
        // Length is validated by the bridge, not here.
        if let EventPayload::JointGoals(goal) = payload {
            assert_eq!(goal.position, vec![0.0, 0.5, -1.0]);
        } else {
            panic!("expected JointGoals");
        }
    }

    #[test]
    fn parse_rejects_non_commands() {
        assert!(parse_inbound("not json").is_none());
        assert!(parse_inbound(r#"{"op":"subscribe","topic":"/joint_states"}"#).is_none());
        assert!(parse_inbound(r#"{"op":"publish","topic":"/arm_status","msg":{"data":"IDLE"}}"#).is_none());
        assert!(parse_inbound(r#"{"op":"publish","topic":"/cmd_vel","msg":{}}"#).is_none());
        assert!(parse_inbound(r#"{"op":"publish","topic":"/run_macro","msg":{"data":7}}"#).is_none());
        assert!(
            parse_inbound(r#"{"op":"publish","topic":"/joint_goals","msg":{"position":[0.0,"x"]}}"#)
                .is_none()
        );
    }

    #[test]
    fn parse_rejects_oversized_frames() {
        let name = "x".repeat(MAX_FRAME_BYTES);
        let frame = format!(r#"{{"op":"publish","topic":"/run_macro","msg":{{"data":"{name}"}}}}"#);
        assert!(parse_inbound(&frame).is_none());
    }

    #[test]
    fn status_frame() {
        let event = Event::new("test", EventPayload::ArmStatus(ArmStatus::RunningMacro));
        let frame = outbound_frame(&event).unwrap();
        assert_eq!(frame["op"], "publish");
        assert_eq!(frame["topic"], "/arm_status");
        assert_eq!(frame["msg"]["data"], "RUNNING_MACRO");
    }

    #[test]
    fn joint_states_frame() {
        let stamp = Utc.timestamp_opt(1_700_000_000, 250).unwrap();
        let state = JointState::from_angles(&JointAngles::HOME, stamp);
        let event = Event::new("test", EventPayload::JointStates(state));
        let frame = outbound_frame(&event).unwrap();
        assert_eq!(frame["topic"], "/joint_states");
        assert_eq!(frame["msg"]["header"]["stamp"]["sec"], 1_700_000_000);
        assert_eq!(frame["msg"]["header"]["stamp"]["nanosec"], 250);
        assert_eq!(frame["msg"]["name"][0], "base");
        assert_eq!(frame["msg"]["position"].as_array().unwrap().len(), 7);
    }

    #[test]
    fn commands_have_no_outbound_frame() {
        let event = Event::new("test", EventPayload::RunMacro("wave".to_string()));
        assert!(outbound_frame(&event).is_none());
    }

    #[tokio::test]
    async fn incoming_command_is_published_on_its_topic() {
        let (bus, gateway) = make_gateway();
        let mut rx = bus.subscribe_to(Topic::RunMacro);

        gateway.handle_incoming_message(r#"{"op":"publish","topic":"/run_macro","msg":{"data":"wave"}}"#);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, SOURCE);
        assert!(matches!(event.payload, EventPayload::RunMacro(ref name) if name == "wave"));
    }

    #[tokio::test]
    async fn unknown_message_is_ignored() {
        let (bus, gateway) = make_gateway();
        let mut rx = bus.subscribe_to(Topic::RunMacro);

        gateway.handle_incoming_message(r#"{"op":"subscribe","topic":"/run_macro"}"#);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn websocket_client_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, gateway) = make_gateway();
        let mut commands = bus.subscribe_to(Topic::RunPose);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(gateway.serve(listener, shutdown_rx));

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await?;
        client
            .send(Message::Text(
                r#"{"op":"publish","topic":"/run_pose","msg":{"data":"home"}}"#
                    .to_string()
                    .into(),
            ))
            .await?;

        let event = tokio::time::timeout(Duration::from_secs(2), commands.recv()).await??;
        assert!(matches!(event.payload, EventPayload::RunPose(ref name) if name == "home"));

        // Once the client is subscribed, status events are forwarded to it.
        tokio::time::timeout(Duration::from_secs(2), async {
            while bus.subscriber_count(Topic::ArmStatus) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        bus.publish_to(
            Topic::ArmStatus,
            Event::new("test", EventPayload::ArmStatus(ArmStatus::Moving)),
        )?;

        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await?
            .ok_or("socket closed")??;
        let json: Value = serde_json::from_str(frame.to_text()?)?;
        assert_eq!(json["topic"], "/arm_status");
        assert_eq!(json["msg"]["data"], "MOVING");

        shutdown_tx.send(true)?;
        tokio::time::timeout(Duration::from_secs(2), server).await??;
        Ok(())
    }
}
