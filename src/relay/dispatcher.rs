//! Relay dispatcher.
//!
//! Drives every input through the relay pipeline:
//! loop guard -> registry lookup -> transform per destination -> send ->
//! correlation record. Created events fan out to the group, edited and deleted
//! events follow the copies recorded for their origin.
//!
//! The run loop keeps one sequential lane per origin channel so relayed order
//! matches inbound order for that channel, while sends to the destinations of
//! a single event run concurrently. A failed destination never aborts its
//! siblings and nothing is retried here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::common::error::{RelayError, RelayResult};
use crate::common::messages::{EventKind, InboundEvent, MessageBody, RelayInput};
use crate::common::types::{AuthorId, ChannelRef, MessageId};
use crate::config::types::Config;
use crate::relay::correlation::{CorrelationStore, RelayedCopy};
use crate::relay::filter::ContentFilter;
use crate::relay::guard::{LoopGuard, Rejection};
use crate::relay::log_relay::{LogRelayFilter, TRANSPORT_TARGET};
use crate::relay::registry::SharedRegistry;
use crate::relay::sender::RelaySender;
use crate::relay::transformer::MessageTransformer;

/// Why an input produced no outbound actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    /// Origin is in no relay group.
    Ungrouped,
    /// Content carries the loop marker.
    RelayedCopy,
    /// Authored by the relay's own identity.
    OwnMessage,
    /// Blocked by the content filter.
    Blocked,
    /// The origin's group has no other members.
    NoDestinations,
    /// Log record rejected by the log relay filter.
    LogRejected,
}

impl From<Rejection> for FilterReason {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Ungrouped => FilterReason::Ungrouped,
            Rejection::RelayedCopy => FilterReason::RelayedCopy,
            Rejection::OwnMessage => FilterReason::OwnMessage,
        }
    }
}

/// Per-destination results of one fan-out.
#[derive(Debug, Default)]
pub struct FanOut {
    pub succeeded: Vec<ChannelRef>,
    pub failed: Vec<RelayError>,
}

impl FanOut {
    fn collect(results: Vec<(ChannelRef, RelayResult<()>)>, origin: &ChannelRef) -> Self {
        let mut fan_out = FanOut::default();
        for (destination, result) in results {
            match result {
                Ok(()) => fan_out.succeeded.push(destination),
                Err(e) => {
                    warn!(
                        target: TRANSPORT_TARGET,
                        origin = %origin,
                        destination = %destination,
                        "{}",
                        e
                    );
                    fan_out.failed.push(e);
                }
            }
        }
        fan_out
    }
}

/// Result of dispatching one input.
#[derive(Debug)]
pub enum DispatchOutcome {
    Filtered(FilterReason),
    /// A created message was fanned out to its group.
    Relayed(FanOut),
    /// An edit was applied to the known copies.
    Edited(FanOut),
    /// The known copies were deleted and the correlation entry evicted.
    Deleted(FanOut),
    /// Edit or delete for an origin with no recorded copies. Not an error.
    UnknownOrigin,
}

/// The relay orchestrator.
pub struct Dispatcher {
    registry: SharedRegistry,
    guard: LoopGuard,
    transformer: MessageTransformer,
    content_filter: ContentFilter,
    log_filter: LogRelayFilter,
    log_label: String,
    store: Arc<CorrelationStore>,
    sender: Arc<dyn RelaySender>,
    log_sequence: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher with default formatting, no filters and log relay disabled.
    pub fn new(
        registry: SharedRegistry,
        sender: Arc<dyn RelaySender>,
        relay_identity: AuthorId,
    ) -> Self {
        Self {
            guard: LoopGuard::new(Arc::clone(&registry), relay_identity),
            transformer: MessageTransformer::with_defaults(Arc::clone(&registry)),
            registry,
            content_filter: ContentFilter::empty(),
            log_filter: LogRelayFilter::disabled(),
            log_label: "log".to_string(),
            store: CorrelationStore::new(),
            sender,
            log_sequence: AtomicU64::new(1),
        }
    }

    /// Create a dispatcher configured from the loaded config.
    pub fn from_config(
        config: &Config,
        registry: SharedRegistry,
        sender: Arc<dyn RelaySender>,
        relay_identity: AuthorId,
        store: Arc<CorrelationStore>,
    ) -> Self {
        Self::new(Arc::clone(&registry), sender, relay_identity)
            .with_transformer(MessageTransformer::from_config(registry, config))
            .with_content_filter(ContentFilter::from_config(
                &config.relay,
                config.filters.as_ref(),
            ))
            .with_log_relay(
                LogRelayFilter::from_config(&config.log_relay),
                config.log_relay.label.clone(),
            )
            .with_store(store)
    }

    pub fn with_transformer(mut self, transformer: MessageTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_content_filter(mut self, filter: ContentFilter) -> Self {
        self.content_filter = filter;
        self
    }

    pub fn with_log_relay(mut self, filter: LogRelayFilter, label: impl Into<String>) -> Self {
        self.log_filter = filter;
        self.log_label = label.into();
        self
    }

    pub fn with_store(mut self, store: Arc<CorrelationStore>) -> Self {
        self.store = store;
        self
    }

    /// Number of origins with tracked copies.
    pub fn correlation_size(&self) -> usize {
        self.store.len()
    }

    /// Drive one input through the pipeline to completion.
    pub async fn dispatch(&self, input: RelayInput) -> DispatchOutcome {
        match self.admit(input) {
            Ok(event) => self.relay_event(event).await,
            Err(reason) => DispatchOutcome::Filtered(reason),
        }
    }

    /// Turn an input into an event; log records pass through the log relay filter.
    fn admit(&self, input: RelayInput) -> Result<InboundEvent, FilterReason> {
        match input {
            RelayInput::Event(event) => Ok(event),
            RelayInput::Log(record) => {
                if !self.log_filter.admit(&record) {
                    return Err(FilterReason::LogRejected);
                }
                let id = MessageId(self.log_sequence.fetch_add(1, Ordering::Relaxed));
                Ok(record.into_event(id, &self.log_label))
            }
        }
    }

    async fn relay_event(&self, event: InboundEvent) -> DispatchOutcome {
        if let Err(rejection) = self.guard.check(&event) {
            debug!(
                target: TRANSPORT_TARGET,
                origin = %event.origin,
                message_id = %event.message_id,
                ?rejection,
                "Not relaying {} event",
                event.kind_name()
            );
            return DispatchOutcome::Filtered(rejection.into());
        }

        match &event.kind {
            EventKind::Created(body) => self.relay_created(&event, body).await,
            EventKind::Edited {
                body,
                previous_content,
            } => {
                self.relay_edited(&event, body, previous_content.as_deref())
                    .await
            }
            EventKind::Deleted => self.relay_deleted(&event).await,
        }
    }

    async fn relay_created(&self, event: &InboundEvent, body: &MessageBody) -> DispatchOutcome {
        if self.content_filter.should_filter(&body.content) {
            info!(
                target: TRANSPORT_TARGET,
                origin = %event.origin,
                "FILTERED message {} from {}",
                event.message_id,
                body.author.name
            );
            return DispatchOutcome::Filtered(FilterReason::Blocked);
        }

        let destinations = self.registry.groups_containing(&event.origin);
        if destinations.is_empty() {
            return DispatchOutcome::Filtered(FilterReason::NoDestinations);
        }

        for line in body.content.lines() {
            debug!(target: TRANSPORT_TARGET, origin = %event.origin, "{} {}", body.author.name, line);
        }

        let sends = destinations.iter().filter_map(|destination| {
            let payload = self.transformer.transform(event, destination)?;
            Some(async move {
                let result = self.sender.send_message(destination, &payload).await;
                (*destination, result)
            })
        });
        let results = join_all(sends).await;

        // Log records can never be edited or deleted, so their copies are not tracked
        let track = !event.origin.is_synthetic();

        // Recorded in registry order once every branch has settled
        let results = results
            .into_iter()
            .map(|(destination, result)| {
                let result = result.map(|copy_id| {
                    if track {
                        self.store.record(RelayedCopy {
                            destination,
                            message_id: copy_id,
                            origin_id: event.message_id,
                            created_at: Utc::now(),
                        });
                    }
                });
                (destination, result)
            })
            .collect();

        let fan_out = FanOut::collect(results, &event.origin);
        info!(
            target: TRANSPORT_TARGET,
            origin = %event.origin,
            "Relayed message {} to {}/{} destinations",
            event.message_id,
            fan_out.succeeded.len(),
            destinations.len()
        );
        DispatchOutcome::Relayed(fan_out)
    }

    async fn relay_edited(
        &self,
        event: &InboundEvent,
        body: &MessageBody,
        previous_content: Option<&str>,
    ) -> DispatchOutcome {
        let copies = self.store.lookup(event.message_id);
        if copies.is_empty() {
            self.unknown_origin(event);
            return DispatchOutcome::UnknownOrigin;
        }
        if self.content_filter.should_filter(&body.content) {
            info!(
                target: TRANSPORT_TARGET,
                origin = %event.origin,
                "FILTERED edit of message {}",
                event.message_id
            );
            return DispatchOutcome::Filtered(FilterReason::Blocked);
        }

        let edits = copies.iter().filter_map(|copy| {
            let payload = self.transformer.transform(event, &copy.destination)?;
            Some(async move {
                let result = self
                    .sender
                    .edit_message(&copy.destination, copy.message_id, &payload)
                    .await;
                (copy.destination, result)
            })
        });
        let fan_out = FanOut::collect(join_all(edits).await, &event.origin);

        debug!(
            target: TRANSPORT_TARGET,
            origin = %event.origin,
            previous = previous_content.unwrap_or("<uncached>"),
            "Edited {}/{} copies of message {}",
            fan_out.succeeded.len(),
            copies.len(),
            event.message_id
        );
        DispatchOutcome::Edited(fan_out)
    }

    async fn relay_deleted(&self, event: &InboundEvent) -> DispatchOutcome {
        let copies = self.store.lookup(event.message_id);
        if copies.is_empty() {
            self.unknown_origin(event);
            return DispatchOutcome::UnknownOrigin;
        }

        let deletes = copies.iter().map(|copy| async move {
            let result = self
                .sender
                .delete_message(&copy.destination, copy.message_id)
                .await;
            (copy.destination, result)
        });
        let fan_out = FanOut::collect(join_all(deletes).await, &event.origin);

        // Evicted whether or not every delete succeeded
        self.store.evict(event.message_id);

        debug!(
            target: TRANSPORT_TARGET,
            origin = %event.origin,
            "Deleted {}/{} copies of message {}",
            fan_out.succeeded.len(),
            copies.len(),
            event.message_id
        );
        DispatchOutcome::Deleted(fan_out)
    }

    fn unknown_origin(&self, event: &InboundEvent) {
        debug!(
            target: TRANSPORT_TARGET,
            origin = %event.origin,
            "Ignoring {} event: {}",
            event.kind_name(),
            RelayError::UnknownOrigin {
                message_id: event.message_id
            }
        );
    }

    /// Consume inputs until shutdown, keeping per-origin order.
    ///
    /// After shutdown no new input is admitted; events already queued in a
    /// lane are finished and in-flight sends complete on their own.
    pub async fn run(
        self: Arc<Self>,
        mut input_rx: mpsc::UnboundedReceiver<RelayInput>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut lanes: HashMap<ChannelRef, Lane> = HashMap::new();
        info!("Dispatcher started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                input = input_rx.recv() => {
                    let Some(input) = input else {
                        break;
                    };
                    // Lanes are only opened for inputs that can produce sends
                    let origin = match &input {
                        RelayInput::Event(event) if self.guard.should_relay(event) => event.origin,
                        RelayInput::Event(_) => continue,
                        RelayInput::Log(_) => ChannelRef::log_relay(),
                    };
                    if !self.registry.is_grouped(&origin) {
                        continue;
                    }

                    let lane = lanes
                        .entry(origin)
                        .or_insert_with(|| Lane::spawn(Arc::clone(&self), origin));
                    if lane.tx.send(input).is_err() {
                        warn!(target: TRANSPORT_TARGET, origin = %origin, "Relay lane closed unexpectedly");
                        lanes.remove(&origin);
                    }
                }
            }
        }

        input_rx.close();
        info!(target: TRANSPORT_TARGET, "Dispatcher draining {} lanes", lanes.len());

        for (origin, lane) in lanes {
            drop(lane.tx);
            if let Err(e) = lane.handle.await {
                warn!(target: TRANSPORT_TARGET, origin = %origin, "Relay lane failed: {}", e);
            }
        }

        info!(
            target: TRANSPORT_TARGET,
            "Dispatcher stopped ({} correlation entries)",
            self.correlation_size()
        );
    }
}

/// Sequential worker for the inputs of one origin channel.
struct Lane {
    tx: mpsc::UnboundedSender<RelayInput>,
    handle: JoinHandle<()>,
}

impl Lane {
    fn spawn(dispatcher: Arc<Dispatcher>, origin: ChannelRef) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RelayInput>();
        let handle = tokio::spawn(async move {
            while let Some(input) = rx.recv().await {
                match dispatcher.dispatch(input).await {
                    DispatchOutcome::Filtered(reason) => {
                        debug!(target: TRANSPORT_TARGET, origin = %origin, ?reason, "Input filtered");
                    }
                    DispatchOutcome::Relayed(fan_out)
                    | DispatchOutcome::Edited(fan_out)
                    | DispatchOutcome::Deleted(fan_out)
                        if !fan_out.failed.is_empty() =>
                    {
                        debug!(
                            target: TRANSPORT_TARGET,
                            origin = %origin,
                            "{} of {} destinations failed",
                            fan_out.failed.len(),
                            fan_out.failed.len() + fan_out.succeeded.len()
                        );
                    }
                    _ => {}
                }
            }
            debug!(target: TRANSPORT_TARGET, origin = %origin, "Relay lane closed");
        });
        Self { tx, handle }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tracing::level_filters::LevelFilter;
    use tracing::Level;

    use super::*;
    use crate::common::messages::LogRecord;
    use crate::common::types::Author;
    use crate::relay::guard::LOOP_MARKER;
    use crate::relay::registry::{ChannelRegistry, RelayGroup};
    use crate::relay::sender::testing::{RecordingSender, SentAction};

    const BOT: AuthorId = AuthorId(999);

    fn a() -> ChannelRef {
        ChannelRef::new(1, 10)
    }
    fn b() -> ChannelRef {
        ChannelRef::new(2, 20)
    }
    fn c() -> ChannelRef {
        ChannelRef::new(3, 30)
    }
    fn log_dest() -> ChannelRef {
        ChannelRef::new(9, 90)
    }

    fn setup() -> (Arc<Dispatcher>, Arc<RecordingSender>) {
        let registry = ChannelRegistry::new(vec![RelayGroup {
            name: "lobby".to_string(),
            members: vec![a(), b(), c()],
        }])
        .with_label(a(), "A")
        .with_label(b(), "B")
        .with_label(c(), "C")
        .with_feed(ChannelRef::log_relay(), vec![log_dest()]);

        let sender = Arc::new(RecordingSender::new());
        let dispatcher = Dispatcher::new(Arc::new(registry), sender.clone(), BOT)
            .with_content_filter(ContentFilter::new(Vec::new(), vec!["!".to_string()]))
            .with_log_relay(
                LogRelayFilter::new(LevelFilter::WARN, vec!["serenity".to_string()]),
                "log",
            );
        (Arc::new(dispatcher), sender)
    }

    fn body(content: &str) -> MessageBody {
        MessageBody {
            author: Author::new(5, "bob"),
            content: content.to_string(),
            attachments: Vec::new(),
            origin_label: None,
        }
    }

    fn created(origin: ChannelRef, id: u64, content: &str) -> RelayInput {
        RelayInput::Event(InboundEvent::created(origin, MessageId(id), body(content)))
    }

    fn edited(origin: ChannelRef, id: u64, content: &str) -> RelayInput {
        RelayInput::Event(InboundEvent::edited(
            origin,
            MessageId(id),
            body(content),
            None,
        ))
    }

    fn deleted(origin: ChannelRef, id: u64) -> RelayInput {
        RelayInput::Event(InboundEvent::deleted(origin, MessageId(id)))
    }

    #[tokio::test]
    async fn test_ungrouped_origin_is_filtered() {
        let (dispatcher, sender) = setup();

        let outcome = dispatcher.dispatch(created(ChannelRef::new(1, 11), 1, "hi")).await;

        assert!(matches!(outcome, DispatchOutcome::Filtered(FilterReason::Ungrouped)));
        assert!(sender.actions().is_empty());
        assert_eq!(dispatcher.correlation_size(), 0);
    }

    #[tokio::test]
    async fn test_created_fans_out_to_other_members() {
        let (dispatcher, sender) = setup();

        let outcome = dispatcher.dispatch(created(a(), 1, "hello")).await;

        match outcome {
            DispatchOutcome::Relayed(fan_out) => {
                assert_eq!(fan_out.succeeded, vec![b(), c()]);
                assert!(fan_out.failed.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(sender.actions_for(a()).is_empty());
        for dest in [b(), c()] {
            let actions = sender.actions_for(dest);
            assert_eq!(actions.len(), 1);
            match &actions[0] {
                SentAction::Send { content, .. } => {
                    assert_eq!(content, &format!("[A] bob: hello{}", LOOP_MARKER));
                }
                other => panic!("unexpected action: {:?}", other),
            }
        }

        let copies = dispatcher.store.lookup(MessageId(1));
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0].destination, b());
        assert_eq!(copies[1].destination, c());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successful_copy() {
        let (dispatcher, sender) = setup();
        sender.fail(c());

        let outcome = dispatcher.dispatch(created(a(), 1, "hello")).await;

        match outcome {
            DispatchOutcome::Relayed(fan_out) => {
                assert_eq!(fan_out.succeeded, vec![b()]);
                assert_eq!(fan_out.failed.len(), 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(dispatcher.correlation_size(), 1);
        let copies = dispatcher.store.lookup(MessageId(1));
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].destination, b());
    }

    #[tokio::test]
    async fn test_relayed_copies_are_never_rerelayed() {
        let (dispatcher, sender) = setup();
        dispatcher.dispatch(created(a(), 1, "hello")).await;

        // Echo every copy back as an inbound message, once as the bot and
        // once under another identity (e.g. a webhook) with the same content
        for action in sender.actions() {
            if let SentAction::Send {
                destination,
                message_id,
                content,
            } = action
            {
                let mut own = body(&content);
                own.author = Author::new(BOT.0, "relay");
                let outcome = dispatcher
                    .dispatch(RelayInput::Event(InboundEvent::created(
                        destination,
                        message_id,
                        own,
                    )))
                    .await;
                assert!(matches!(outcome, DispatchOutcome::Filtered(FilterReason::OwnMessage)));

                let outcome = dispatcher
                    .dispatch(created(destination, message_id.0 + 1, &content))
                    .await;
                assert!(matches!(outcome, DispatchOutcome::Filtered(FilterReason::RelayedCopy)));
            }
        }

        assert_eq!(sender.actions().len(), 2);
    }

    #[tokio::test]
    async fn test_edit_updates_each_copy_once() {
        let (dispatcher, sender) = setup();
        dispatcher.dispatch(created(a(), 1, "hello")).await;
        let copies = dispatcher.store.lookup(MessageId(1));

        let outcome = dispatcher.dispatch(edited(a(), 1, "hello, edited")).await;

        assert!(matches!(outcome, DispatchOutcome::Edited(ref f) if f.succeeded.len() == 2));
        let edits: Vec<SentAction> = sender
            .actions()
            .into_iter()
            .filter(|a| matches!(a, SentAction::Edit { .. }))
            .collect();
        assert_eq!(edits.len(), 2);
        for copy in &copies {
            assert!(edits.contains(&SentAction::Edit {
                destination: copy.destination,
                message_id: copy.message_id,
                content: format!("[A] bob: hello, edited{}", LOOP_MARKER),
            }));
        }
        let sends = sender
            .actions()
            .iter()
            .filter(|a| matches!(a, SentAction::Send { .. }))
            .count();
        assert_eq!(sends, 2);
    }

    #[tokio::test]
    async fn test_edit_unknown_origin_is_noop() {
        let (dispatcher, sender) = setup();

        let outcome = dispatcher.dispatch(edited(a(), 77, "changed")).await;

        assert!(matches!(outcome, DispatchOutcome::UnknownOrigin));
        assert!(sender.actions().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_copies_and_evicts() {
        let (dispatcher, sender) = setup();
        dispatcher.dispatch(created(a(), 1, "hello")).await;
        let copies = dispatcher.store.lookup(MessageId(1));

        let outcome = dispatcher.dispatch(deleted(a(), 1)).await;

        assert!(matches!(outcome, DispatchOutcome::Deleted(ref f) if f.succeeded.len() == 2));
        for copy in &copies {
            assert!(sender.actions().contains(&SentAction::Delete {
                destination: copy.destination,
                message_id: copy.message_id,
            }));
        }
        assert_eq!(dispatcher.correlation_size(), 0);

        let before = sender.actions().len();
        assert!(matches!(
            dispatcher.dispatch(edited(a(), 1, "again")).await,
            DispatchOutcome::UnknownOrigin
        ));
        assert!(matches!(
            dispatcher.dispatch(deleted(a(), 1)).await,
            DispatchOutcome::UnknownOrigin
        ));
        assert_eq!(sender.actions().len(), before);
    }

    #[tokio::test]
    async fn test_delete_evicts_even_when_a_delete_fails() {
        let (dispatcher, sender) = setup();
        dispatcher.dispatch(created(a(), 1, "hello")).await;
        sender.fail(b());

        let outcome = dispatcher.dispatch(deleted(a(), 1)).await;

        match outcome {
            DispatchOutcome::Deleted(fan_out) => {
                assert_eq!(fan_out.succeeded, vec![c()]);
                assert_eq!(fan_out.failed.len(), 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(dispatcher.correlation_size(), 0);
    }

    #[tokio::test]
    async fn test_command_prefix_not_relayed() {
        let (dispatcher, sender) = setup();

        let outcome = dispatcher.dispatch(created(a(), 1, "!help")).await;

        assert!(matches!(outcome, DispatchOutcome::Filtered(FilterReason::Blocked)));
        assert!(sender.actions().is_empty());
    }

    #[tokio::test]
    async fn test_slow_destination_does_not_delay_others() {
        let (dispatcher, sender) = setup();
        sender.delay(b(), Duration::from_millis(100));

        dispatcher.dispatch(created(a(), 1, "hello")).await;

        let order: Vec<ChannelRef> = sender.actions().iter().map(|a| a.destination()).collect();
        assert_eq!(order, vec![c(), b()]);
        // Correlation order still follows the group order
        let copies = dispatcher.store.lookup(MessageId(1));
        assert_eq!(copies[0].destination, b());
        assert_eq!(copies[1].destination, c());
    }

    #[tokio::test]
    async fn test_log_records_follow_filter_rules() {
        let (dispatcher, sender) = setup();

        let excluded = LogRecord::new(Level::ERROR, "serenity::gateway", "shard died");
        let quiet = LogRecord::new(Level::INFO, "relaybot", "connected");
        let reserved = LogRecord::new(Level::ERROR, TRANSPORT_TARGET, "send failed");
        for record in [excluded, quiet, reserved] {
            assert!(matches!(
                dispatcher.dispatch(RelayInput::Log(record)).await,
                DispatchOutcome::Filtered(FilterReason::LogRejected)
            ));
        }
        assert!(sender.actions().is_empty());

        let loud = LogRecord::new(Level::WARN, "relaybot::config", "disk almost full");
        let outcome = dispatcher.dispatch(RelayInput::Log(loud)).await;

        assert!(matches!(outcome, DispatchOutcome::Relayed(ref f) if f.succeeded == vec![log_dest()]));
        let actions = sender.actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(
            actions[0],
            SentAction::Send {
                destination: log_dest(),
                message_id: MessageId(1000),
                content: format!("[log] relaybot::config / WARN: disk almost full{}", LOOP_MARKER),
            }
        );
        // Log copies are never edited or deleted, so nothing is tracked for them
        assert_eq!(dispatcher.correlation_size(), 0);
    }

    #[tokio::test]
    async fn test_run_preserves_per_origin_order() {
        let (dispatcher, sender) = setup();
        sender.delay(c(), Duration::from_millis(5));
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(Arc::clone(&dispatcher).run(input_rx, shutdown_rx));

        for i in 0..10u64 {
            input_tx.send(created(a(), i + 1, &format!("msg {}", i))).unwrap();
        }
        // Ungrouped inputs are dropped without a lane
        input_tx.send(created(ChannelRef::new(7, 70), 500, "nowhere")).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        for dest in [b(), c()] {
            let contents: Vec<String> = sender
                .actions_for(dest)
                .into_iter()
                .map(|a| match a {
                    SentAction::Send { content, .. } => content,
                    other => panic!("unexpected action: {:?}", other),
                })
                .collect();
            let expected: Vec<String> = (0..10)
                .map(|i| format!("[A] bob: msg {}{}", i, LOOP_MARKER))
                .collect();
            assert_eq!(contents, expected);
        }
        assert_eq!(dispatcher.correlation_size(), 10);

        // No admission after shutdown
        assert!(input_tx.send(created(a(), 99, "late")).is_err());
    }

    #[tokio::test]
    async fn test_run_slow_origin_does_not_block_other_origins() {
        let d = ChannelRef::new(4, 40);
        let e = ChannelRef::new(5, 50);
        let registry = ChannelRegistry::new(vec![
            RelayGroup {
                name: "lobby".to_string(),
                members: vec![a(), b()],
            },
            RelayGroup {
                name: "trade".to_string(),
                members: vec![d, e],
            },
        ])
        .with_label(a(), "A")
        .with_label(d, "D");
        let sender = Arc::new(RecordingSender::new());
        sender.delay(b(), Duration::from_millis(300));
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), sender.clone(), BOT));
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(Arc::clone(&dispatcher).run(input_rx, shutdown_rx));

        // Lane A stalls on its first send; D arrives later and must not wait for it
        input_tx.send(created(a(), 1, "first")).unwrap();
        input_tx.send(created(a(), 2, "second")).unwrap();
        input_tx.send(created(d, 3, "trade")).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sender.actions_for(e).len(), 1);
        assert!(sender.actions_for(b()).is_empty());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        // Shutdown drains the stalled lane in order
        let contents: Vec<String> = sender
            .actions_for(b())
            .into_iter()
            .map(|a| match a {
                SentAction::Send { content, .. } => content,
                other => panic!("unexpected action: {:?}", other),
            })
            .collect();
        assert_eq!(
            contents,
            vec![
                format!("[A] bob: first{}", LOOP_MARKER),
                format!("[A] bob: second{}", LOOP_MARKER),
            ]
        );
        assert_eq!(dispatcher.correlation_size(), 3);
    }

    #[tokio::test]
    async fn test_run_handles_edit_after_create_in_order() {
        let (dispatcher, sender) = setup();
        sender.delay(b(), Duration::from_millis(20));
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(Arc::clone(&dispatcher).run(input_rx, shutdown_rx));

        // Queued back to back: the edit must see the copies recorded by the create
        input_tx.send(created(a(), 1, "first")).unwrap();
        input_tx.send(edited(a(), 1, "second")).unwrap();
        input_tx.send(deleted(a(), 1)).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();
        tokio_test::assert_ok!(task.await);

        let kinds: Vec<&str> = sender
            .actions_for(b())
            .iter()
            .map(|a| match a {
                SentAction::Send { .. } => "send",
                SentAction::Edit { .. } => "edit",
                SentAction::Delete { .. } => "delete",
            })
            .collect();
        assert_eq!(kinds, vec!["send", "edit", "delete"]);
        assert_eq!(dispatcher.correlation_size(), 0);
    }
}
