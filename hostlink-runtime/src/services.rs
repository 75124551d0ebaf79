//! Collaborator services reachable from the guest.
//!
//! The marshaling layer does not know what these services do; it decodes
//! arguments, forwards the call and encodes the result. A guest calling a
//! service that the embedder did not register gets a host exception.

use dashmap::DashMap;
use hostlink_core::error::HostlinkError;
use hostlink_core::value::HostValue;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Result of a service call; `Err` carries the thrown value.
pub type ServiceResult<T> = std::result::Result<T, HostValue>;

/// Applies guest-produced edits to a host-side node tree.
pub trait PatchApplier: Send + Sync {
    /// Attach to the root node and the event handler table.
    fn initialize(&self, root: HostValue, handlers: HostValue) -> ServiceResult<()>;

    /// Consume an edit buffer from guest memory.
    fn update_memory(&self, memory: &[u8]) -> ServiceResult<()>;

    /// Look up a node by id.
    fn get_node(&self, id: u32) -> ServiceResult<HostValue>;
}

/// Two-way message channel between guest and host.
pub trait MessageChannel: Send + Sync {
    /// Guest to host.
    fn send(&self, message: HostValue) -> ServiceResult<()>;

    /// Host to guest; `undefined` when nothing is waiting.
    fn recv(&self) -> ServiceResult<HostValue>;
}

/// Reads the current selection of a form control.
pub trait SelectionSource: Send + Sync {
    /// Selected values of `element`.
    fn select_data(&self, element: &HostValue) -> ServiceResult<Vec<HostValue>>;
}

/// Services registered by the embedder.
#[derive(Clone, Default)]
pub struct HostServices {
    patcher: Option<Arc<dyn PatchApplier>>,
    channel: Option<Arc<dyn MessageChannel>>,
    selection: Option<Arc<dyn SelectionSource>>,
}

impl HostServices {
    /// No services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the patch applier.
    pub fn with_patcher(mut self, patcher: Arc<dyn PatchApplier>) -> Self {
        self.patcher = Some(patcher);
        self
    }

    /// Register the message channel.
    pub fn with_channel(mut self, channel: Arc<dyn MessageChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Register the selection source.
    pub fn with_selection(mut self, selection: Arc<dyn SelectionSource>) -> Self {
        self.selection = Some(selection);
        self
    }

    /// The patch applier, or a host exception.
    pub fn patcher(&self) -> ServiceResult<&Arc<dyn PatchApplier>> {
        self.patcher
            .as_ref()
            .ok_or_else(|| unavailable("patch_applier"))
    }

    /// The message channel, or a host exception.
    pub fn channel(&self) -> ServiceResult<&Arc<dyn MessageChannel>> {
        self.channel
            .as_ref()
            .ok_or_else(|| unavailable("message_channel"))
    }

    /// The selection source, or a host exception.
    pub fn selection(&self) -> ServiceResult<&Arc<dyn SelectionSource>> {
        self.selection
            .as_ref()
            .ok_or_else(|| unavailable("selection_source"))
    }
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices")
            .field("patcher", &self.patcher.is_some())
            .field("channel", &self.channel.is_some())
            .field("selection", &self.selection.is_some())
            .finish()
    }
}

fn unavailable(service: &'static str) -> HostValue {
    HostValue::error(HostlinkError::ServiceUnavailable { service }.to_string())
}

/// Queue-backed [`MessageChannel`].
///
/// The embedder pushes messages for the guest with [`push`](Self::push) and
/// collects what the guest sent with [`drain_sent`](Self::drain_sent).
#[derive(Debug, Default)]
pub struct InMemoryChannel {
    to_guest: Mutex<VecDeque<HostValue>>,
    from_guest: Mutex<VecDeque<HostValue>>,
}

impl InMemoryChannel {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for the guest.
    pub fn push(&self, message: HostValue) {
        self.to_guest.lock().push_back(message);
    }

    /// Queue a JSON message for the guest.
    pub fn push_json(&self, message: &JsonValue) {
        self.push(HostValue::from_json(message));
    }

    /// Take everything the guest sent.
    pub fn drain_sent(&self) -> Vec<HostValue> {
        self.from_guest.lock().drain(..).collect()
    }

    /// Take everything the guest sent, as JSON.
    ///
    /// Messages without a JSON form are dropped with a warning.
    pub fn drain_sent_json(&self) -> Vec<JsonValue> {
        self.drain_sent()
            .into_iter()
            .filter_map(|message| {
                let json = message.to_json();
                if json.is_none() {
                    tracing::warn!(kind = message.kind(), "Dropping message without a JSON form");
                }
                json
            })
            .collect()
    }

    /// Number of messages waiting for the guest.
    pub fn pending(&self) -> usize {
        self.to_guest.lock().len()
    }
}

impl MessageChannel for InMemoryChannel {
    fn send(&self, message: HostValue) -> ServiceResult<()> {
        self.from_guest.lock().push_back(message);
        Ok(())
    }

    fn recv(&self) -> ServiceResult<HostValue> {
        Ok(self.to_guest.lock().pop_front().unwrap_or_default())
    }
}

/// [`SelectionSource`] reading `<select>`-like objects.
///
/// The element must expose an `options` array whose entries carry `value`
/// and `selected`; the values of selected entries are returned in order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormSelection;

impl SelectionSource for FormSelection {
    fn select_data(&self, element: &HostValue) -> ServiceResult<Vec<HostValue>> {
        let HostValue::Array(options) = element.get("options") else {
            return Err(HostValue::type_error(format!(
                "{} has no options",
                element.debug_string()
            )));
        };
        Ok(options
            .to_vec()
            .into_iter()
            .filter(|option| option.get("selected").as_bool() == Some(true))
            .map(|option| HostValue::string(option.get("value").to_display_string()))
            .collect())
    }
}

/// [`PatchApplier`] that records what the guest asked for.
///
/// Nodes registered with [`register_node`](Self::register_node) are served
/// by `get_node`; the root passed to `initialize` is node `0`.
#[derive(Debug, Default)]
pub struct RecordingPatcher {
    handlers: Mutex<Option<HostValue>>,
    nodes: DashMap<u32, HostValue>,
    updates: AtomicUsize,
    last_update: Mutex<Vec<u8>>,
}

impl RecordingPatcher {
    /// Create an empty patcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `node` available under `id`.
    pub fn register_node(&self, id: u32, node: HostValue) {
        self.nodes.insert(id, node);
    }

    /// Whether `initialize` was called.
    pub fn is_initialized(&self) -> bool {
        self.handlers.lock().is_some()
    }

    /// Number of `update_memory` calls.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }

    /// Copy of the last edit buffer.
    pub fn last_update(&self) -> Vec<u8> {
        self.last_update.lock().clone()
    }
}

impl PatchApplier for RecordingPatcher {
    fn initialize(&self, root: HostValue, handlers: HostValue) -> ServiceResult<()> {
        self.nodes.insert(0, root);
        *self.handlers.lock() = Some(handlers);
        Ok(())
    }

    fn update_memory(&self, memory: &[u8]) -> ServiceResult<()> {
        if !self.is_initialized() {
            return Err(HostValue::error("update_memory called before initialize"));
        }
        self.updates.fetch_add(1, Ordering::Relaxed);
        *self.last_update.lock() = memory.to_vec();
        Ok(())
    }

    fn get_node(&self, id: u32) -> ServiceResult<HostValue> {
        Ok(self
            .nodes
            .get(&id)
            .map(|node| node.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_core::value::{ArrayRef, ObjectRef};
    use serde_json::json;

    #[test]
    fn missing_service_is_a_host_exception() {
        let services = HostServices::new();
        let Err(thrown) = services.channel() else {
            panic!("channel should be missing");
        };
        assert!(thrown.get("message").as_str().unwrap().contains("E701"));
    }

    #[test]
    fn channel_round_trip() {
        let channel = InMemoryChannel::new();
        channel.push_json(&json!({"kind": "ping"}));
        assert_eq!(channel.pending(), 1);

        let received = channel.recv().unwrap();
        assert_eq!(received.get("kind").as_str(), Some("ping"));
        assert!(channel.recv().unwrap().is_undefined());

        channel.send(HostValue::from_json(&json!([1, 2]))).unwrap();
        channel.send(HostValue::BigInt(3)).unwrap();
        assert_eq!(channel.drain_sent_json(), vec![json!([1.0, 2.0])]);
    }

    #[test]
    fn form_selection_returns_selected_values() {
        let option = |value: &str, selected: bool| {
            HostValue::Object(
                ObjectRef::plain()
                    .with("value", value)
                    .with("selected", selected),
            )
        };
        let select = HostValue::Object(ObjectRef::with_class("HTMLSelectElement").with(
            "options",
            ArrayRef::from_vec(vec![
                option("a", true),
                option("b", false),
                option("c", true),
            ]),
        ));

        let values = FormSelection.select_data(&select).unwrap();
        let values: Vec<_> = values.iter().filter_map(HostValue::as_str).collect();
        assert_eq!(values, vec!["a", "c"]);
        assert!(FormSelection.select_data(&HostValue::Null).is_err());
    }

    #[test]
    fn recording_patcher() {
        let patcher = RecordingPatcher::new();
        assert!(patcher.update_memory(&[1]).is_err());

        let root = HostValue::Object(ObjectRef::with_class("HTMLDivElement"));
        patcher.initialize(root.clone(), HostValue::Null).unwrap();
        patcher.update_memory(&[1, 2, 3]).unwrap();
        assert_eq!(patcher.update_count(), 1);
        assert_eq!(patcher.last_update(), vec![1, 2, 3]);
        assert!(patcher.get_node(0).unwrap().strict_eq(&root));
        assert!(patcher.get_node(9).unwrap().is_undefined());
    }
}
