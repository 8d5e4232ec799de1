//! Typed, topic-based publish/subscribe message bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Direction | Payload |
//! |---|---|---|
//! | [`Topic::RunMacro`] | inbound | macro name |
//! | [`Topic::RunPose`] | inbound | pose name |
//! | [`Topic::JointGoals`] | inbound | joint positions, radians |
//! | [`Topic::JointStates`] | outbound | joint names + positions, radians |
//! | [`Topic::ArmStatus`] | outbound | current [`ArmStatus`][armbridge_types::ArmStatus] |

use std::fmt;

use armbridge_types::{BridgeError, Event};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Every named channel on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Play back a stored macro.
    RunMacro,
    /// Load a stored pose.
    RunPose,
    /// Move all joints to absolute goals.
    JointGoals,
    /// Last known joint configuration, published periodically.
    JointStates,
    /// Current arm status, published alongside joint states.
    ArmStatus,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::RunMacro,
        Topic::RunPose,
        Topic::JointGoals,
        Topic::JointStates,
        Topic::ArmStatus,
    ];

    /// Channel name, e.g. `"run_macro"`.
    pub fn name(&self) -> &'static str {
        match self {
            Topic::RunMacro => "run_macro",
            Topic::RunPose => "run_pose",
            Topic::JointGoals => "joint_goals",
            Topic::JointStates => "joint_states",
            Topic::ArmStatus => "arm_status",
        }
    }

    /// Resolve a channel name, with or without a leading `/`.
    pub fn from_name(name: &str) -> Option<Topic> {
        let name = name.strip_prefix('/').unwrap_or(name);
        Topic::ALL.into_iter().find(|t| t.name() == name)
    }

    /// `true` for the command channels consumed by the bridge.
    pub fn is_inbound(&self) -> bool {
        matches!(self, Topic::RunMacro | Topic::RunPose | Topic::JointGoals)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared message bus. Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    run_macro: broadcast::Sender<Event>,
    run_pose: broadcast::Sender<Event>,
    joint_goals: broadcast::Sender<Event>,
    joint_states: broadcast::Sender<Event>,
    arm_status: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (run_macro, _) = broadcast::channel(capacity);
        let (run_pose, _) = broadcast::channel(capacity);
        let (joint_goals, _) = broadcast::channel(capacity);
        let (joint_states, _) = broadcast::channel(capacity);
        let (arm_status, _) = broadcast::channel(capacity);
        Self {
            run_macro,
            run_pose,
            joint_goals,
            joint_states,
            arm_status,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Channel`] when nobody is subscribed to the
    /// topic. Callers publishing periodic state may treat this as normal.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, BridgeError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| BridgeError::Channel(format!("no subscribers for topic {topic}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::RunMacro => &self.run_macro,
            Topic::RunPose => &self.run_pose,
            Topic::JointGoals => &self.joint_goals,
            Topic::JointStates => &self.joint_states,
            Topic::ArmStatus => &self.arm_status,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armbridge_types::{ArmStatus, EventPayload};

    fn status_event(status: ArmStatus) -> Event {
        Event::new("armbridge-middleware::test", EventPayload::ArmStatus(status))
    }

    #[test]
    fn topic_names_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(Topic::from_name(topic.name()), Some(topic));
            assert_eq!(Topic::from_name(&format!("/{}", topic.name())), Some(topic));
        }
        assert_eq!(Topic::from_name("/cmd_vel"), None);
    }

    #[test]
    fn inbound_topics() {
        let inbound: Vec<_> = Topic::ALL.into_iter().filter(Topic::is_inbound).collect();
        assert_eq!(inbound, [Topic::RunMacro, Topic::RunPose, Topic::JointGoals]);
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::ArmStatus, status_event(ArmStatus::Idle));
        assert!(matches!(result, Err(BridgeError::Channel(_))));
    }

    /// Two independent subscribers on the same topic both receive the event.
    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::ArmStatus);
        let mut subscriber2 = bus.subscribe_to(Topic::ArmStatus);
        assert_eq!(bus.subscriber_count(Topic::ArmStatus), 2);

        let event = status_event(ArmStatus::Moving);
        assert_eq!(bus.publish_to(Topic::ArmStatus, event.clone())?, 2);

        assert_eq!(subscriber1.recv().await?.id, event.id);
        assert_eq!(subscriber2.recv().await?.id, event.id);
        assert_eq!(subscriber1.topic(), Topic::ArmStatus);
        Ok(())
    }

    /// A subscriber on `RunPose` must not receive events published to
    /// `RunMacro`.
    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut pose_sub = bus.subscribe_to(Topic::RunPose);
        let _macro_sub = bus.subscribe_to(Topic::RunMacro);

        bus.publish_to(
            Topic::RunMacro,
            Event::new("test", EventPayload::RunMacro("wave".to_string())),
        )?;

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            pose_sub.recv(),
        )
        .await;

        assert!(result.is_err(), "RunPose subscriber must not receive a RunMacro event");
        Ok(())
    }

    /// Flooding a low-capacity channel while a subscriber sleeps must produce
    /// a `Lagged` error rather than panicking or blocking.
    #[tokio::test]
    async fn topic_channel_lag_on_slow_subscriber() {
        const CAPACITY: usize = 16;
        let bus = EventBus::new(CAPACITY);
        let mut slow_sub = bus.subscribe_to(Topic::JointStates);

        for _ in 0..1_000 {
            let _ = bus.publish_to(Topic::JointStates, status_event(ArmStatus::Idle));
        }

        let result = slow_sub.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
