use crate::config::{ConfigStore, FieldKey, missing_required_labels};
use crate::hotkey::HotkeyBackend;
use crate::send_log::SendLog;
use crate::sender::{MessageSender, OutgoingMessage};
use anyhow::{Result, bail};
use chrono::Utc;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    ConfigChanged,
    Activated { shortcut: String },
    Deactivated,
    ForcedDeactivation { reason: String },
    SendSucceeded,
    SendFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Activated,
    Deactivated,
    MissingConfig { missing: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Saved,
    ShortcutRebound,
    Deactivated { reason: String },
}

/// Owns the activation state machine: maps configuration readiness to the
/// single live hotkey registration and decides when a trigger becomes a send.
///
/// All mutating calls arrive serialized from the UI event loop. The hotkey
/// callback path only snapshots already-loaded strings and hands off to a
/// detached worker, so the trigger is never blocked on network I/O.
pub struct ActivationController {
    store: ConfigStore,
    hotkey: Box<dyn HotkeyBackend>,
    sender: Arc<dyn MessageSender>,
    send_log: Option<SendLog>,
    event_tx: Option<UnboundedSender<ControllerEvent>>,
    active: bool,
    hotkey_id: Option<u32>,
}

impl ActivationController {
    pub fn new(
        store: ConfigStore,
        hotkey: Box<dyn HotkeyBackend>,
        sender: Arc<dyn MessageSender>,
        send_log: Option<SendLog>,
        event_tx: Option<UnboundedSender<ControllerEvent>>,
    ) -> Self {
        Self {
            store,
            hotkey,
            sender,
            send_log,
            event_tx,
            active: false,
            hotkey_id: None,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn active_hotkey_id(&self) -> Option<u32> {
        self.hotkey_id
    }

    /// Labels of required fields whose trimmed value is empty, in the
    /// declaration order of the field table.
    pub fn missing_required_fields(&self) -> Vec<String> {
        missing_required_labels(&self.store)
    }

    pub fn is_ready(&self) -> bool {
        self.missing_required_fields().is_empty()
    }

    pub fn toggle_active(&mut self) -> Result<ToggleOutcome> {
        if self.active {
            self.unbind_hotkey();
            self.active = false;
            self.notify(ControllerEvent::Deactivated);
            return Ok(ToggleOutcome::Deactivated);
        }

        let missing = self.missing_required_fields();
        if !missing.is_empty() {
            return Ok(ToggleOutcome::MissingConfig { missing });
        }

        self.active = true;
        if let Err(err) = self.bind_hotkey() {
            self.active = false;
            return Err(err.context("activation aborted"));
        }

        self.notify(ControllerEvent::Activated {
            shortcut: self.store.get(FieldKey::Shortcut).to_string(),
        });
        Ok(ToggleOutcome::Activated)
    }

    /// Persists one field through the store, then re-evaluates activation:
    /// rebinding the hotkey when the shortcut changed, forcing deactivation
    /// when readiness was lost. Write failures propagate without losing the
    /// in-memory state.
    pub fn edit_field(&mut self, key: FieldKey, value: &str) -> Result<EditOutcome> {
        let previous_shortcut = self.store.get(FieldKey::Shortcut).to_string();
        self.store.save(&[(key, value.trim().to_string())])?;

        let outcome = self.apply_config_change(&previous_shortcut);
        self.notify(ControllerEvent::ConfigChanged);
        Ok(outcome)
    }

    /// Picks up external edits of the config file (same invalidation and
    /// rebind pass as `edit_field`).
    pub fn reload_config(&mut self) -> EditOutcome {
        let previous_shortcut = self.store.get(FieldKey::Shortcut).to_string();
        self.store.load();

        let outcome = self.apply_config_change(&previous_shortcut);
        self.notify(ControllerEvent::ConfigChanged);
        outcome
    }

    fn apply_config_change(&mut self, previous_shortcut: &str) -> EditOutcome {
        let mut outcome = EditOutcome::Saved;

        if self.active {
            let current = self.store.get(FieldKey::Shortcut).to_string();
            if current != previous_shortcut {
                match self.bind_hotkey() {
                    Ok(()) => outcome = EditOutcome::ShortcutRebound,
                    Err(err) => {
                        return self.force_deactivate(format!(
                            "failed to rebind hotkey '{current}': {err:#}"
                        ));
                    }
                }
            }
        }

        if self.active {
            let missing = self.missing_required_fields();
            if !missing.is_empty() {
                return self.force_deactivate(format!(
                    "missing required configuration: {}",
                    missing.join(", ")
                ));
            }
        }

        outcome
    }

    fn force_deactivate(&mut self, reason: String) -> EditOutcome {
        self.unbind_hotkey();
        self.active = false;
        self.notify(ControllerEvent::ForcedDeactivation {
            reason: reason.clone(),
        });
        EditOutcome::Deactivated { reason }
    }

    /// Unconditional unbind, for process exit and the forced paths.
    pub fn deactivate(&mut self) {
        let was_active = self.active;
        self.unbind_hotkey();
        self.active = false;
        if was_active {
            self.notify(ControllerEvent::Deactivated);
        }
    }

    /// Invoked from the hotkey listener's context. Returns immediately; the
    /// actual call runs on a detached worker and never changes activation
    /// state, whatever its outcome.
    pub fn on_hotkey_triggered(&self) {
        if !self.active {
            return;
        }
        self.dispatch_send();
    }

    /// The same fire-and-forget dispatch without the active guard, for the
    /// tray's test-send action.
    pub fn send_now(&self) {
        self.dispatch_send();
    }

    fn dispatch_send(&self) {
        let message = OutgoingMessage {
            content: self.store.get(FieldKey::Message).to_string(),
            token: self.store.get(FieldKey::DiscordToken).to_string(),
            user_id: self.store.get(FieldKey::DiscordUserId).to_string(),
            server_id: self.store.get(FieldKey::ServerId).to_string(),
            channel_id: self.store.get(FieldKey::ChannelId).to_string(),
        };
        let sender = Arc::clone(&self.sender);
        let send_log = self.send_log.clone();
        let event_tx = self.event_tx.clone();

        thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    send_event(
                        &event_tx,
                        ControllerEvent::SendFailed {
                            message: format!("runtime error: {err}"),
                        },
                    );
                    return;
                }
            };

            match runtime.block_on(sender.send(&message)) {
                Ok(()) => {
                    if let Some(log) = &send_log {
                        let _ = log.append_success(Utc::now(), &message.content);
                    }
                    send_event(&event_tx, ControllerEvent::SendSucceeded);
                }
                Err(err) => {
                    let text = format!("{err:#}");
                    if let Some(log) = &send_log {
                        let _ = log.append_failure(Utc::now(), &message.content, &text);
                    }
                    send_event(&event_tx, ControllerEvent::SendFailed { message: text });
                }
            }
        });
    }

    fn bind_hotkey(&mut self) -> Result<()> {
        self.unbind_hotkey();

        let shortcut = self.store.get(FieldKey::Shortcut).trim().to_string();
        if shortcut.is_empty() {
            bail!("shortcut is empty");
        }

        let id = self.hotkey.register(&shortcut)?;
        self.hotkey_id = Some(id);
        Ok(())
    }

    fn unbind_hotkey(&mut self) {
        self.hotkey.unregister_all();
        self.hotkey_id = None;
    }

    fn notify(&self, event: ControllerEvent) {
        send_event(&self.event_tx, event);
    }
}

fn send_event(event_tx: &Option<UnboundedSender<ControllerEvent>>, event: ControllerEvent) {
    if let Some(tx) = event_tx {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::{ActivationController, ControllerEvent, EditOutcome, ToggleOutcome};
    use crate::config::{ConfigStore, DEFAULT_MESSAGE, FieldKey};
    use crate::hotkey::HotkeyBackend;
    use crate::send_log::SendLog;
    use crate::sender::{MessageSender, OutgoingMessage};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum HotkeyCall {
        Register(String),
        UnregisterAll,
    }

    #[derive(Clone, Default)]
    struct FakeHotkeys {
        calls: Arc<Mutex<Vec<HotkeyCall>>>,
        fail_next_register: Arc<Mutex<bool>>,
        next_id: Arc<Mutex<u32>>,
    }

    impl FakeHotkeys {
        fn calls(&self) -> Vec<HotkeyCall> {
            self.calls.lock().expect("calls mutex poisoned").clone()
        }

        fn registrations(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    HotkeyCall::Register(shortcut) => Some(shortcut),
                    HotkeyCall::UnregisterAll => None,
                })
                .collect()
        }

        fn fail_next_register(&self) {
            *self
                .fail_next_register
                .lock()
                .expect("fail flag mutex poisoned") = true;
        }
    }

    impl HotkeyBackend for FakeHotkeys {
        fn register(&mut self, shortcut: &str) -> Result<u32> {
            self.calls
                .lock()
                .expect("calls mutex poisoned")
                .push(HotkeyCall::Register(shortcut.to_string()));
            if std::mem::take(
                &mut *self
                    .fail_next_register
                    .lock()
                    .expect("fail flag mutex poisoned"),
            ) {
                anyhow::bail!("platform denied registration");
            }
            let mut id = self.next_id.lock().expect("id mutex poisoned");
            *id += 1;
            Ok(*id)
        }

        fn unregister_all(&mut self) {
            self.calls
                .lock()
                .expect("calls mutex poisoned")
                .push(HotkeyCall::UnregisterAll);
        }
    }

    #[derive(Clone, Default)]
    struct FakeSender {
        sent: Arc<Mutex<Vec<OutgoingMessage>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl FakeSender {
        fn sent(&self) -> Vec<OutgoingMessage> {
            self.sent.lock().expect("sent mutex poisoned").clone()
        }

        fn fail_sends(&self) {
            *self.fail.lock().expect("fail mutex poisoned") = true;
        }
    }

    #[async_trait]
    impl MessageSender for FakeSender {
        async fn send(&self, message: &OutgoingMessage) -> Result<()> {
            if *self.fail.lock().expect("fail mutex poisoned") {
                anyhow::bail!("network unreachable");
            }
            self.sent
                .lock()
                .expect("sent mutex poisoned")
                .push(message.clone());
            Ok(())
        }
    }

    struct Harness {
        controller: ActivationController,
        hotkeys: FakeHotkeys,
        sender: FakeSender,
        events: UnboundedReceiver<ControllerEvent>,
        _temp: TempDir,
    }

    fn harness() -> Harness {
        let temp = tempdir().expect("tempdir");
        let store = ConfigStore::new(temp.path().join("dms.conf"));
        let hotkeys = FakeHotkeys::default();
        let sender = FakeSender::default();
        let log = SendLog::new(temp.path().join("send-log.md"));
        let (tx, rx) = mpsc::unbounded_channel();

        let controller = ActivationController::new(
            store,
            Box::new(hotkeys.clone()),
            Arc::new(sender.clone()),
            Some(log),
            Some(tx),
        );

        Harness {
            controller,
            hotkeys,
            sender,
            events: rx,
            _temp: temp,
        }
    }

    fn fill_required(controller: &mut ActivationController) {
        controller
            .edit_field(FieldKey::DiscordToken, "token-abcdef")
            .expect("edit token");
        controller
            .edit_field(FieldKey::DiscordUserId, "1001")
            .expect("edit user id");
        controller
            .edit_field(FieldKey::ServerId, "2002")
            .expect("edit server id");
        controller
            .edit_field(FieldKey::ChannelId, "3003")
            .expect("edit channel id");
        controller
            .edit_field(FieldKey::Shortcut, "alt+KeyD")
            .expect("edit shortcut");
    }

    fn drain(events: &mut UnboundedReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn starts_inactive_and_not_ready() {
        let h = harness();
        assert!(!h.controller.is_active());
        assert!(!h.controller.is_ready());
    }

    #[test]
    fn missing_fields_follow_declaration_order() {
        let h = harness();
        // Shortcut and message carry defaults, so only the four identifier
        // fields are missing on a fresh store.
        assert_eq!(
            h.controller.missing_required_fields(),
            vec![
                "Discord Token",
                "Discord User Id",
                "Server Id",
                "Channel Id"
            ]
        );
    }

    #[test]
    fn toggle_refuses_activation_when_config_incomplete() {
        let mut h = harness();
        let outcome = h.controller.toggle_active().expect("toggle");

        match outcome {
            ToggleOutcome::MissingConfig { missing } => {
                assert_eq!(missing.first().map(String::as_str), Some("Discord Token"));
            }
            other => panic!("expected missing-config outcome, got {other:?}"),
        }
        assert!(!h.controller.is_active());
        assert!(h.hotkeys.registrations().is_empty());
    }

    #[test]
    fn toggle_activates_and_registers_current_shortcut() {
        let mut h = harness();
        fill_required(&mut h.controller);

        let outcome = h.controller.toggle_active().expect("toggle");
        assert_eq!(outcome, ToggleOutcome::Activated);
        assert!(h.controller.is_active());
        assert!(h.controller.active_hotkey_id().is_some());
        assert_eq!(h.hotkeys.registrations(), vec!["alt+KeyD".to_string()]);
    }

    #[test]
    fn toggle_twice_registers_then_unregisters_exactly_once() {
        let mut h = harness();
        fill_required(&mut h.controller);

        h.controller.toggle_active().expect("activate");
        let outcome = h.controller.toggle_active().expect("deactivate");

        assert_eq!(outcome, ToggleOutcome::Deactivated);
        assert!(!h.controller.is_active());
        assert!(h.controller.active_hotkey_id().is_none());
        assert_eq!(h.hotkeys.registrations().len(), 1);
        assert_eq!(h.hotkeys.calls().last(), Some(&HotkeyCall::UnregisterAll));
    }

    #[test]
    fn activation_reverts_when_registration_fails() {
        let mut h = harness();
        fill_required(&mut h.controller);
        h.hotkeys.fail_next_register();

        let err = h.controller.toggle_active().expect_err("activation fails");
        assert!(err.to_string().contains("activation aborted"));
        assert!(!h.controller.is_active());
        assert!(h.controller.active_hotkey_id().is_none());
    }

    #[test]
    fn editing_shortcut_while_active_rebinds_once() {
        let mut h = harness();
        fill_required(&mut h.controller);
        h.controller.toggle_active().expect("activate");
        let before = h.hotkeys.calls().len();

        let outcome = h
            .controller
            .edit_field(FieldKey::Shortcut, "alt+KeyF")
            .expect("edit shortcut");

        assert_eq!(outcome, EditOutcome::ShortcutRebound);
        assert!(h.controller.is_active());
        let mut all_calls = h.hotkeys.calls();
        let new_calls = all_calls.split_off(before);
        assert_eq!(
            new_calls,
            vec![
                HotkeyCall::UnregisterAll,
                HotkeyCall::Register("alt+KeyF".to_string()),
            ]
        );
    }

    #[test]
    fn editing_other_field_while_active_does_not_rebind() {
        let mut h = harness();
        fill_required(&mut h.controller);
        h.controller.toggle_active().expect("activate");
        let before = h.hotkeys.calls().len();

        let outcome = h
            .controller
            .edit_field(FieldKey::Message, "new message")
            .expect("edit message");

        assert_eq!(outcome, EditOutcome::Saved);
        assert!(h.controller.is_active());
        assert_eq!(h.hotkeys.calls().len(), before);
    }

    #[test]
    fn clearing_required_field_while_active_forces_deactivation() {
        let mut h = harness();
        fill_required(&mut h.controller);
        h.controller.toggle_active().expect("activate");
        drain(&mut h.events);

        let outcome = h
            .controller
            .edit_field(FieldKey::DiscordToken, "")
            .expect("edit token");

        match outcome {
            EditOutcome::Deactivated { reason } => {
                assert!(reason.contains("Discord Token"));
            }
            other => panic!("expected forced deactivation, got {other:?}"),
        }
        assert!(!h.controller.is_active());
        assert_eq!(h.hotkeys.calls().last(), Some(&HotkeyCall::UnregisterAll));

        let events = drain(&mut h.events);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ControllerEvent::ForcedDeactivation { .. }))
        );
    }

    #[test]
    fn rebind_failure_while_active_forces_deactivation() {
        let mut h = harness();
        fill_required(&mut h.controller);
        h.controller.toggle_active().expect("activate");
        h.hotkeys.fail_next_register();

        let outcome = h
            .controller
            .edit_field(FieldKey::Shortcut, "alt+KeyZ")
            .expect("edit shortcut");

        assert!(matches!(outcome, EditOutcome::Deactivated { .. }));
        assert!(!h.controller.is_active());
        assert!(h.controller.active_hotkey_id().is_none());
    }

    #[test]
    fn edit_emits_config_changed_event() {
        let mut h = harness();
        drain(&mut h.events);

        h.controller
            .edit_field(FieldKey::ServerId, "777")
            .expect("edit server id");

        let events = drain(&mut h.events);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ControllerEvent::ConfigChanged))
        );
    }

    #[test]
    fn reload_after_external_clear_forces_deactivation() {
        let mut h = harness();
        fill_required(&mut h.controller);
        h.controller.toggle_active().expect("activate");

        // Simulate an external editor blanking the token in the file.
        let path = h.controller.store().path().to_path_buf();
        let mut external = ConfigStore::new(&path);
        external
            .save(&[(FieldKey::DiscordToken, String::new())])
            .expect("external save");

        let outcome = h.controller.reload_config();
        assert!(matches!(outcome, EditOutcome::Deactivated { .. }));
        assert!(!h.controller.is_active());
    }

    #[test]
    fn hotkey_trigger_is_ignored_while_inactive() {
        let h = harness();
        h.controller.on_hotkey_triggered();
        // Nothing is dispatched, so nothing ever lands in the fake sender.
        std::thread::sleep(Duration::from_millis(50));
        assert!(h.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn hotkey_trigger_dispatches_send_with_current_snapshot() {
        let mut h = harness();
        fill_required(&mut h.controller);
        h.controller
            .edit_field(FieldKey::Message, "status: all clear")
            .expect("edit message");
        h.controller.toggle_active().expect("activate");
        drain(&mut h.events);

        h.controller.on_hotkey_triggered();

        let event = wait_for_send_event(&mut h.events).await;
        assert!(matches!(event, ControllerEvent::SendSucceeded));

        let sent = h.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "status: all clear");
        assert_eq!(sent[0].token, "token-abcdef");
        assert_eq!(sent[0].server_id, "2002");
        assert_eq!(sent[0].channel_id, "3003");

        let log_path = h.controller.store().path().with_file_name("send-log.md");
        let log = std::fs::read_to_string(log_path).expect("send log exists");
        assert!(log.contains("## Sent at"));
    }

    #[tokio::test]
    async fn send_failure_is_reported_and_leaves_state_active() {
        let mut h = harness();
        fill_required(&mut h.controller);
        h.controller.toggle_active().expect("activate");
        h.sender.fail_sends();
        drain(&mut h.events);

        h.controller.on_hotkey_triggered();

        let event = wait_for_send_event(&mut h.events).await;
        match event {
            ControllerEvent::SendFailed { message } => {
                assert!(message.contains("network unreachable"));
            }
            other => panic!("expected send failure event, got {other:?}"),
        }
        assert!(h.controller.is_active());
        assert!(h.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn send_now_works_without_activation() {
        let mut h = harness();
        fill_required(&mut h.controller);
        drain(&mut h.events);

        h.controller.send_now();

        let event = wait_for_send_event(&mut h.events).await;
        assert!(matches!(event, ControllerEvent::SendSucceeded));
        assert_eq!(h.sender.sent().len(), 1);
        assert_eq!(h.sender.sent()[0].content, DEFAULT_MESSAGE);
    }

    async fn wait_for_send_event(
        events: &mut UnboundedReceiver<ControllerEvent>,
    ) -> ControllerEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("timeout waiting for controller event")
                .expect("event channel closed");
            if matches!(
                event,
                ControllerEvent::SendSucceeded | ControllerEvent::SendFailed { .. }
            ) {
                return event;
            }
        }
    }
}
