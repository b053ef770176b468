use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::log_warn;
use crate::types::{Message, MessagePriority, MessageType};

pub const DEFAULT_MAX_HISTORY_SIZE: usize = 10_000;
pub const DEFAULT_MESSAGE_TTL_SECONDS: i64 = 24 * 3600;

type HandlerFn = Box<dyn Fn(&Message) + Send + Sync>;

/// Filters accepted by `get_messages` and `search`.
#[derive(Default, Clone)]
pub struct MessageFilter {
    pub since: Option<String>,
    pub types: Option<HashSet<MessageType>>,
    pub priority: Option<MessagePriority>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub objective_id: Option<String>,
    pub task_id: Option<String>,
    pub issue_id: Option<String>,
    pub limit: Option<usize>,
}

enum BusCommand {
    Send {
        message: Message,
        reply: oneshot::Sender<Message>,
    },
    Subscribe {
        phase: String,
        types: Vec<MessageType>,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        phase: String,
        types: Vec<MessageType>,
        reply: oneshot::Sender<()>,
    },
    RegisterHandler {
        phase: String,
        message_type: MessageType,
        handler: HandlerFn,
        reply: oneshot::Sender<()>,
    },
    GetMessages {
        phase: String,
        filter: MessageFilter,
        reply: oneshot::Sender<Vec<Message>>,
    },
    Search {
        filter: MessageFilter,
        reply: oneshot::Sender<Vec<Message>>,
    },
    AwaitResponse {
        in_response_to: String,
        reply: oneshot::Sender<Option<Message>>,
    },
}

/// Clone-able front door to the bus actor. All mutation of bus state is
/// serialized through the actor task; handles only send commands.
#[derive(Clone)]
pub struct MessageBusHandle {
    sender: mpsc::Sender<BusCommand>,
}

impl MessageBusHandle {
    async fn call<T>(&self, command: BusCommand, rx: oneshot::Receiver<T>) -> Result<T, String> {
        self.sender
            .send(command)
            .await
            .map_err(|_| "message bus shut down".to_string())?;
        rx.await.map_err(|_| "message bus dropped reply".to_string())
    }

    pub async fn send(
        &self,
        sender: &str,
        recipient: &str,
        message_type: MessageType,
        payload: BTreeMap<String, serde_json::Value>,
        priority: MessagePriority,
    ) -> Result<Message, String> {
        let message = build_message(sender, recipient, message_type, payload, priority, false, None);
        let (reply, rx) = oneshot::channel();
        self.call(BusCommand::Send { message, reply }, rx).await
    }

    pub async fn broadcast(
        &self,
        sender: &str,
        message_type: MessageType,
        payload: BTreeMap<String, serde_json::Value>,
        priority: MessagePriority,
    ) -> Result<Message, String> {
        self.send(sender, crate::types::BROADCAST, message_type, payload, priority)
            .await
    }

    /// Sends a message that requires a response, then waits up to
    /// `timeout_secs` for a reply with `in_response_to` equal to the sent
    /// message's id. Returns `None` on timeout; no message is left behind
    /// in history search results under that id beyond the original request.
    pub async fn request(
        &self,
        sender: &str,
        recipient: &str,
        message_type: MessageType,
        payload: BTreeMap<String, serde_json::Value>,
        timeout_secs: u64,
    ) -> Result<Option<Message>, String> {
        let message = build_message(
            sender,
            recipient,
            message_type,
            payload,
            MessagePriority::Normal,
            true,
            Some(timeout_secs),
        );
        let (reply, rx) = oneshot::channel();
        let sent = self.call(BusCommand::Send { message, reply }, rx).await?;

        let (await_reply, await_rx) = oneshot::channel();
        self.sender
            .send(BusCommand::AwaitResponse {
                in_response_to: sent.id.clone(),
                reply: await_reply,
            })
            .await
            .map_err(|_| "message bus shut down".to_string())?;

        match timeout(Duration::from_secs(timeout_secs), await_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err("message bus dropped reply".to_string()),
            Err(_) => Ok(None),
        }
    }

    pub async fn subscribe(&self, phase: &str, types: Vec<MessageType>) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.call(
            BusCommand::Subscribe {
                phase: phase.to_string(),
                types,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn unsubscribe(&self, phase: &str, types: Vec<MessageType>) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.call(
            BusCommand::Unsubscribe {
                phase: phase.to_string(),
                types,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn register_handler(
        &self,
        phase: &str,
        message_type: MessageType,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.call(
            BusCommand::RegisterHandler {
                phase: phase.to_string(),
                message_type,
                handler: Box::new(handler),
                reply,
            },
            rx,
        )
        .await
    }

    /// Returns `phase`'s queue ordered by priority then timestamp (FIFO
    /// within a priority class, higher priority overtakes lower).
    pub async fn get_messages(&self, phase: &str, filter: MessageFilter) -> Result<Vec<Message>, String> {
        let (reply, rx) = oneshot::channel();
        self.call(
            BusCommand::GetMessages {
                phase: phase.to_string(),
                filter,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn search(&self, filter: MessageFilter) -> Result<Vec<Message>, String> {
        let (reply, rx) = oneshot::channel();
        self.call(BusCommand::Search { filter }, rx).await
    }
}

fn build_message(
    sender: &str,
    recipient: &str,
    message_type: MessageType,
    payload: BTreeMap<String, serde_json::Value>,
    priority: MessagePriority,
    requires_response: bool,
    response_timeout: Option<u64>,
) -> Message {
    Message {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        sender: sender.to_string(),
        recipient: recipient.to_string(),
        message_type,
        priority,
        payload,
        objective_id: None,
        task_id: None,
        issue_id: None,
        file_path: None,
        requires_response,
        response_timeout,
        in_response_to: None,
        tags: Vec::new(),
        metadata: BTreeMap::new(),
    }
}

struct BusState {
    history: Vec<Message>,
    queues: HashMap<String, Vec<Message>>,
    subscriptions: HashMap<String, HashSet<MessageType>>,
    handlers: HashMap<(String, MessageType), Vec<HandlerFn>>,
    pending_responses: HashMap<String, oneshot::Sender<Option<Message>>>,
    max_history_size: usize,
    message_ttl_seconds: i64,
}

impl BusState {
    fn new(max_history_size: usize, message_ttl_seconds: i64) -> Self {
        Self {
            history: Vec::new(),
            queues: HashMap::new(),
            subscriptions: HashMap::new(),
            handlers: HashMap::new(),
            pending_responses: HashMap::new(),
            max_history_size,
            message_ttl_seconds,
        }
    }

    fn deliver(&mut self, message: Message) {
        if let Some(ref in_response_to) = message.in_response_to {
            if let Some(waiter) = self.pending_responses.remove(in_response_to) {
                let _ = waiter.send(Some(message.clone()));
            }
        }

        if message.is_broadcast() {
            let recipients: Vec<String> = self.subscriptions.keys().cloned().collect();
            for phase in recipients {
                self.enqueue_for(&phase, message.clone());
            }
        } else {
            self.enqueue_for(&message.recipient.clone(), message.clone());
        }

        self.run_handlers(&message);
        self.history.push(message);
        self.expire_and_trim();
    }

    fn enqueue_for(&mut self, phase: &str, message: Message) {
        self.queues.entry(phase.to_string()).or_default().push(message);
    }

    fn run_handlers(&self, message: &Message) {
        let key_specific = (message.recipient.clone(), message.message_type);
        if let Some(handlers) = self.handlers.get(&key_specific) {
            for handler in handlers {
                handler(message);
            }
        }
    }

    fn expire_and_trim(&mut self) {
        let now = chrono::Utc::now();
        self.history.retain(|m| {
            chrono::DateTime::parse_from_rfc3339(&m.timestamp)
                .map(|ts| (now - ts.with_timezone(&chrono::Utc)).num_seconds() < self.message_ttl_seconds)
                .unwrap_or(true)
        });
        if self.history.len() > self.max_history_size {
            let overflow = self.history.len() - self.max_history_size;
            self.history.drain(0..overflow);
        }
        for queue in self.queues.values_mut() {
            queue.retain(|m| {
                chrono::DateTime::parse_from_rfc3339(&m.timestamp)
                    .map(|ts| (now - ts.with_timezone(&chrono::Utc)).num_seconds() < self.message_ttl_seconds)
                    .unwrap_or(true)
            });
        }
    }

    fn get_messages(&self, phase: &str, filter: &MessageFilter) -> Vec<Message> {
        let mut results: Vec<Message> = self
            .queues
            .get(phase)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| matches_filter(m, filter))
            .collect();
        sort_by_priority_then_time(&mut results);
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        results
    }

    fn search(&self, filter: &MessageFilter) -> Vec<Message> {
        let mut results: Vec<Message> = self
            .history
            .iter()
            .filter(|m| matches_filter(m, filter))
            .cloned()
            .collect();
        sort_by_priority_then_time(&mut results);
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        results
    }
}

fn matches_filter(m: &Message, filter: &MessageFilter) -> bool {
    if let Some(ref since) = filter.since {
        if m.timestamp.as_str() < since.as_str() {
            return false;
        }
    }
    if let Some(ref types) = filter.types {
        if !types.contains(&m.message_type) {
            return false;
        }
    }
    if let Some(priority) = filter.priority {
        if m.priority != priority {
            return false;
        }
    }
    if let Some(ref sender) = filter.sender {
        if &m.sender != sender {
            return false;
        }
    }
    if let Some(ref recipient) = filter.recipient {
        if &m.recipient != recipient {
            return false;
        }
    }
    if let Some(ref objective_id) = filter.objective_id {
        if m.objective_id.as_deref() != Some(objective_id.as_str()) {
            return false;
        }
    }
    if let Some(ref task_id) = filter.task_id {
        if m.task_id.as_deref() != Some(task_id.as_str()) {
            return false;
        }
    }
    if let Some(ref issue_id) = filter.issue_id {
        if m.issue_id.as_deref() != Some(issue_id.as_str()) {
            return false;
        }
    }
    true
}

fn sort_by_priority_then_time(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.timestamp.cmp(&b.timestamp)));
}

/// Spawns the bus actor task and returns a handle to it. Mirrors the
/// coordinator's single-writer actor pattern: all mutation happens on one
/// task, callers only ever hold a cloneable handle.
pub fn spawn_message_bus() -> MessageBusHandle {
    spawn_message_bus_with_limits(DEFAULT_MAX_HISTORY_SIZE, DEFAULT_MESSAGE_TTL_SECONDS)
}

pub fn spawn_message_bus_with_limits(max_history_size: usize, message_ttl_seconds: i64) -> MessageBusHandle {
    let (tx, mut rx) = mpsc::channel::<BusCommand>(256);
    tokio::spawn(async move {
        let mut state = BusState::new(max_history_size, message_ttl_seconds);
        while let Some(command) = rx.recv().await {
            match command {
                BusCommand::Send { message, reply } => {
                    let sent = message.clone();
                    state.deliver(message);
                    if reply.send(sent).is_err() {
                        log_warn!("Warning: bus caller dropped reply channel before send reply");
                    }
                }
                BusCommand::Subscribe { phase, types, reply } => {
                    let entry = state.subscriptions.entry(phase).or_default();
                    entry.extend(types);
                    let _ = reply.send(());
                }
                BusCommand::Unsubscribe { phase, types, reply } => {
                    if let Some(entry) = state.subscriptions.get_mut(&phase) {
                        for t in types {
                            entry.remove(&t);
                        }
                    }
                    let _ = reply.send(());
                }
                BusCommand::RegisterHandler {
                    phase,
                    message_type,
                    handler,
                    reply,
                } => {
                    state.handlers.entry((phase, message_type)).or_default().push(handler);
                    let _ = reply.send(());
                }
                BusCommand::GetMessages { phase, filter, reply } => {
                    let _ = reply.send(state.get_messages(&phase, &filter));
                }
                BusCommand::Search { filter, reply } => {
                    let _ = reply.send(state.search(&filter));
                }
                BusCommand::AwaitResponse { in_response_to, reply } => {
                    state.pending_responses.insert(in_response_to, reply);
                }
            }
        }
    });
    MessageBusHandle { sender: tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_get_messages_returns_it() {
        let bus = spawn_message_bus();
        bus.send("planning", "coding", MessageType::TaskCreated, BTreeMap::new(), MessagePriority::Normal)
            .await
            .unwrap();
        let got = bus.get_messages("coding", MessageFilter::default()).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].sender, "planning");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let bus = spawn_message_bus();
        bus.subscribe("qa", vec![MessageType::SystemAlert]).await.unwrap();
        bus.subscribe("debugging", vec![MessageType::SystemAlert]).await.unwrap();
        bus.broadcast("coordinator", MessageType::SystemAlert, BTreeMap::new(), MessagePriority::High)
            .await
            .unwrap();
        assert_eq!(bus.get_messages("qa", MessageFilter::default()).await.unwrap().len(), 1);
        assert_eq!(
            bus.get_messages("debugging", MessageFilter::default()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn priority_overtakes_fifo_order_at_dequeue() {
        let bus = spawn_message_bus();
        bus.send("a", "b", MessageType::SystemInfo, BTreeMap::new(), MessagePriority::Low)
            .await
            .unwrap();
        bus.send("a", "b", MessageType::SystemAlert, BTreeMap::new(), MessagePriority::Critical)
            .await
            .unwrap();
        let got = bus.get_messages("b", MessageFilter::default()).await.unwrap();
        assert_eq!(got[0].priority, MessagePriority::Critical);
        assert_eq!(got[1].priority, MessagePriority::Low);
    }

    #[tokio::test]
    async fn request_without_reply_times_out_to_none() {
        let bus = spawn_message_bus();
        let response = bus
            .request("phase_a", "phase_b", MessageType::PhaseRequest, BTreeMap::new(), 1)
            .await
            .unwrap();
        assert!(response.is_none());

        let search = bus.search(MessageFilter::default()).await.unwrap();
        assert!(search.iter().all(|m| m.message_type != MessageType::PhaseResponse));
    }

    #[tokio::test]
    async fn request_resolved_by_matching_response() {
        let bus = spawn_message_bus();
        let bus_for_responder = bus.clone();

        let sent = bus
            .send("phase_a", "phase_b", MessageType::PhaseRequest, BTreeMap::new(), MessagePriority::Normal)
            .await
            .unwrap();

        let requester = tokio::spawn(async move {
            bus_for_responder
                .request("phase_a", "phase_b", MessageType::PhaseRequest, BTreeMap::new(), 5)
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let (reply, rx) = oneshot::channel();
        bus.sender
            .send(BusCommand::Send {
                message: Message {
                    in_response_to: Some(sent.id.clone()),
                    ..build_message(
                        "phase_b",
                        "phase_a",
                        MessageType::PhaseResponse,
                        BTreeMap::new(),
                        MessagePriority::Normal,
                        false,
                        None,
                    )
                },
                reply,
            })
            .await
            .unwrap();
        rx.await.unwrap();

        let result = requester.await.unwrap().unwrap();
        assert!(result.is_some());
    }
}
