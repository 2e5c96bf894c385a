mod support;

use std::sync::Arc;
use std::time::Duration;

use jobchat_core::backend::{BackendOp, CompletedJobDto, MessageDto, ScriptedFaults};
use jobchat_core::{
    AppAction, ChatApp, Conversation, ConversationStatus, OperationKind,
};
use support::{
    bodies, revs, snapshots, wait_for_active, wait_until, write_config, write_config_json,
    GatedBackend, TestReconciler,
};
use tempfile::tempdir;

const TIMEOUT: Duration = Duration::from_secs(5);

fn create(app: &ChatApp, job: &str, homeowner: &str, trader: &str) {
    app.dispatch(AppAction::CreateConversation {
        job_id: job.into(),
        homeowner_id: homeowner.into(),
        trader_id: trader.into(),
    });
}

fn send(app: &ChatApp, conversation_id: &str, body: &str) {
    app.dispatch(AppAction::SendMessage {
        conversation_id: conversation_id.into(),
        sender_id: "home_1".into(),
        body: body.into(),
        attachments: vec![],
    });
}

fn start(poll_interval_ms: u64, backend: Arc<GatedBackend>) -> (tempfile::TempDir, Arc<ChatApp>) {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_string_lossy().to_string();
    write_config(&data_dir, poll_interval_ms);
    let app = ChatApp::with_backend(data_dir, backend);
    (dir, app)
}

fn seed_conversation(backend: &GatedBackend, id: &str, job: &str, trader: &str, created_at: i64) {
    backend.inner.insert_conversation(Conversation {
        id: id.into(),
        job_id: job.into(),
        homeowner_id: "home_1".into(),
        trader_id: trader.into(),
        status: ConversationStatus::Open,
        created_at,
    });
}

#[test]
fn job_seven_hello_goes_pending_then_confirmed() {
    let backend = GatedBackend::new();
    let (_dir, app) = start(50, backend.clone());

    create(&app, "job_7", "home_1", "trade_9");
    let conversation_id = wait_for_active(&app);
    let conversation = app.state().current_chat.unwrap().conversation;
    assert_eq!(conversation.job_id, "job_7");
    assert_eq!(conversation.homeowner_id, "home_1");
    assert_eq!(conversation.trader_id, "trade_9");
    assert_eq!(conversation.status, ConversationStatus::Open);

    backend.hold_send("Hello");
    send(&app, &conversation_id, "Hello");
    wait_until("pending Hello", TIMEOUT, || {
        bodies(&app.current_messages()) == vec![("Hello".to_string(), true)]
    });
    let local_id = app.current_messages()[0].id.clone();
    assert_eq!(local_id.len(), 36, "client ids are uuid v4");

    backend.release_send("Hello");
    wait_until("Hello confirmed", TIMEOUT, || {
        bodies(&app.current_messages()) == vec![("Hello".to_string(), false)]
    });
    let confirmed = &app.current_messages()[0];
    assert_eq!(confirmed.id, local_id);
    let stored = backend.inner.messages(&conversation_id);
    assert_eq!(stored.len(), 1);
    assert_eq!(confirmed.created_at, stored[0].created_at);

    // Later polls do not duplicate the echoed message.
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(app.current_messages().len(), 1);
    assert!(app.state().error.is_none());
}

#[test]
fn creating_the_same_triple_twice_yields_one_conversation() {
    let backend = GatedBackend::new();
    let (_dir, app) = start(1_000, backend.clone());

    // Back to back: the second request is absorbed while the first is in flight.
    create(&app, "job_7", "home_1", "trade_9");
    create(&app, "job_7", "home_1", "trade_9");
    let first = wait_for_active(&app);
    let created_at = app.state().conversations[0].created_at;

    // Already known locally: no network call, same id and timestamp.
    app.dispatch(AppAction::LeaveConversation);
    wait_until("left", TIMEOUT, || app.state().current_chat.is_none());
    create(&app, " job_7 ", "home_1", "trade_9 ");
    let second = wait_for_active(&app);

    let state = app.state();
    assert_eq!(first, second);
    assert_eq!(state.conversations.len(), 1);
    assert_eq!(state.conversations[0].created_at, created_at);
    assert_eq!(backend.inner.conversation_count(), 1);
    assert_eq!(backend.create_calls(), 1);
}

#[test]
fn send_order_is_kept_when_confirmations_arrive_out_of_order() {
    let backend = GatedBackend::new();
    let (_dir, app) = start(1_000, backend.clone());
    create(&app, "job_7", "home_1", "trade_9");
    let conversation_id = wait_for_active(&app);

    backend.hold_send("A");
    backend.hold_send("B");
    send(&app, &conversation_id, "A");
    send(&app, &conversation_id, "B");
    wait_until("both pending", TIMEOUT, || app.current_messages().len() == 2);

    backend.release_send("B");
    wait_until("B confirmed", TIMEOUT, || {
        bodies(&app.current_messages())
            == vec![("A".to_string(), true), ("B".to_string(), false)]
    });

    backend.release_send("A");
    wait_until("A confirmed", TIMEOUT, || {
        bodies(&app.current_messages())
            == vec![("A".to_string(), false), ("B".to_string(), false)]
    });
}

#[test]
fn failed_send_rolls_back_and_reports_a_retryable_error() {
    let faults = Arc::new(ScriptedFaults::new());
    let backend = GatedBackend::with_faults(faults.clone());
    let (_dir, app) = start(1_000, backend.clone());
    let (reconciler, updates) = TestReconciler::new();
    app.listen_for_updates(Box::new(reconciler));

    create(&app, "job_7", "home_1", "trade_9");
    let conversation_id = wait_for_active(&app);
    send(&app, &conversation_id, "kept");
    wait_until("kept confirmed", TIMEOUT, || {
        bodies(&app.current_messages()) == vec![("kept".to_string(), false)]
    });

    faults.fail_next(BackendOp::SendMessage, 1);
    send(&app, &conversation_id, "lost");
    wait_until("send error", TIMEOUT, || app.state().error.is_some());

    let state = app.state();
    let error = state.error.unwrap();
    assert_eq!(error.op, OperationKind::SendMessage);
    assert!(error.retryable);
    assert_eq!(
        bodies(&state.current_chat.unwrap().messages),
        vec![("kept".to_string(), false)]
    );
    // The optimistic entry was visible before the rollback.
    let saw_pending = snapshots(&updates).iter().any(|s| {
        s.current_chat
            .as_ref()
            .is_some_and(|c| c.messages.iter().any(|m| m.body == "lost" && m.pending))
    });
    assert!(saw_pending);

    // A later successful send clears the error.
    send(&app, &conversation_id, "retry");
    wait_until("error cleared", TIMEOUT, || app.state().error.is_none());
}

#[test]
fn lost_ack_for_an_echoed_message_is_not_an_error() {
    let backend = GatedBackend::new();
    let (_dir, app) = start(50, backend.clone());
    create(&app, "job_7", "home_1", "trade_9");
    let conversation_id = wait_for_active(&app);

    // The server stores the message, a poll echoes it, then the ack fails.
    backend.lose_ack("Hello");
    send(&app, &conversation_id, "Hello");
    wait_until("echoed by a poll", TIMEOUT, || {
        bodies(&app.current_messages()) == vec![("Hello".to_string(), false)]
    });
    backend.release_lost_ack("Hello");
    wait_until("ack failure returned", TIMEOUT, || backend.lost_acks() == 1);
    std::thread::sleep(Duration::from_millis(200));

    assert!(app.state().error.is_none(), "a re-send would duplicate the message");
    assert_eq!(
        bodies(&app.current_messages()),
        vec![("Hello".to_string(), false)]
    );
    assert_eq!(backend.inner.messages(&conversation_id).len(), 1);
}

#[test]
fn hung_send_rolls_back_after_the_request_timeout() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_string_lossy().to_string();
    write_config_json(
        &data_dir,
        serde_json::json!({
            "disable_network": true,
            "poll_interval_ms": 1_000,
            "request_timeout_ms": 100,
        }),
    );
    let backend = GatedBackend::new();
    let app = ChatApp::with_backend(data_dir, backend.clone());
    create(&app, "job_7", "home_1", "trade_9");
    let conversation_id = wait_for_active(&app);

    backend.hold_send("slow");
    send(&app, &conversation_id, "slow");
    wait_until("send timed out", TIMEOUT, || {
        app.state()
            .error
            .is_some_and(|e| e.op == OperationKind::SendMessage && e.retryable)
    });
    assert!(app
        .state()
        .error
        .is_some_and(|e| e.message.contains("timed out")));
    assert!(app.current_messages().is_empty());
    assert!(backend.inner.messages(&conversation_id).is_empty());
}

#[test]
fn stale_poll_results_are_discarded() {
    let backend = GatedBackend::new();
    seed_conversation(&backend, "c1", "job_1", "trade_1", 1);
    seed_conversation(&backend, "c2", "job_2", "trade_2", 2);
    backend.inner.insert_message(MessageDto {
        id: "m-c1".into(),
        conversation_id: "c1".into(),
        sender_id: "trade_1".into(),
        body: "for c1".into(),
        created_at: 10,
        attachments: vec![],
    });
    let (_dir, app) = start(60_000, backend.clone());
    app.dispatch(AppAction::RefreshChatList {
        auth_token: "token".into(),
        user_id: "home_1".into(),
    });
    wait_until("conversations known", TIMEOUT, || {
        app.state().conversations.len() == 2
    });

    backend.hold_list("c1");
    backend.hold_list("c2");
    app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".into(),
    });
    wait_until("c1 fetch issued", TIMEOUT, || backend.list_calls("c1") == 1);
    app.dispatch(AppAction::OpenConversation {
        conversation_id: "c2".into(),
    });
    wait_until("c2 fetch issued", TIMEOUT, || backend.list_calls("c2") == 1);
    let rev_before = app.state().rev;

    // c1's answer arrives after c2 became active.
    backend.release_list("c1");
    std::thread::sleep(Duration::from_millis(200));
    let state = app.state();
    assert_eq!(state.rev, rev_before, "stale result must not publish state");
    assert!(state.busy.loading_messages);
    assert_eq!(state.active_conversation_id.as_deref(), Some("c2"));
    assert!(app.current_messages().is_empty());

    backend.release_list("c2");
    wait_until("c2 loaded", TIMEOUT, || !app.state().busy.loading_messages);
    assert!(app.current_messages().is_empty());
    assert_eq!(backend.list_calls("c1"), 1, "c1 polling was cancelled");
}

#[test]
fn polling_merges_remote_messages_and_stops_on_leave() {
    let backend = GatedBackend::new();
    let (_dir, app) = start(50, backend.clone());
    create(&app, "job_7", "home_1", "trade_9");
    let conversation_id = wait_for_active(&app);

    backend.inner.insert_message(MessageDto {
        id: "remote-1".into(),
        conversation_id: conversation_id.clone(),
        sender_id: "trade_9".into(),
        body: "Can do Tuesday".into(),
        created_at: 5,
        attachments: vec![],
    });
    wait_until("remote message polled", TIMEOUT, || {
        bodies(&app.current_messages()) == vec![("Can do Tuesday".to_string(), false)]
    });

    app.dispatch(AppAction::LeaveConversation);
    wait_until("left", TIMEOUT, || app.state().active_conversation_id.is_none());
    std::thread::sleep(Duration::from_millis(100));
    let calls = backend.list_calls(&conversation_id);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(backend.list_calls(&conversation_id), calls);
}

#[test]
fn failed_polls_are_silent() {
    let faults = Arc::new(ScriptedFaults::new());
    let backend = GatedBackend::with_faults(faults.clone());
    let (_dir, app) = start(50, backend.clone());
    create(&app, "job_7", "home_1", "trade_9");
    let conversation_id = wait_for_active(&app);

    faults.fail_next(BackendOp::ListMessages, 3);
    let calls = backend.list_calls(&conversation_id);
    wait_until("polling continues past failures", TIMEOUT, || {
        backend.list_calls(&conversation_id) >= calls + 4
    });
    assert!(app.state().error.is_none());
}

#[test]
fn closed_conversation_rejects_sends_before_the_network() {
    let backend = GatedBackend::new();
    let (_dir, app) = start(1_000, backend.clone());
    create(&app, "job_7", "home_1", "trade_9");
    let conversation_id = wait_for_active(&app);

    app.dispatch(AppAction::EndConversation {
        conversation_id: conversation_id.clone(),
    });
    wait_until("closed", TIMEOUT, || {
        app.state()
            .current_chat
            .is_some_and(|c| c.conversation.status == ConversationStatus::Closed)
    });
    assert!(!app.state().current_chat.unwrap().can_send);

    send(&app, &conversation_id, "too late");
    wait_until("rejected", TIMEOUT, || app.state().error.is_some());
    let error = app.state().error.unwrap();
    assert_eq!(error.op, OperationKind::SendMessage);
    assert!(!error.retryable);
    assert!(app.current_messages().is_empty());
    assert!(backend.inner.messages(&conversation_id).is_empty());

    app.dispatch(AppAction::ClearError);
    wait_until("error cleared", TIMEOUT, || app.state().error.is_none());
}

#[test]
fn invalid_input_never_reaches_the_backend() {
    let backend = GatedBackend::new();
    let (_dir, app) = start(1_000, backend.clone());

    create(&app, "  ", "home_1", "trade_9");
    wait_until("validation error", TIMEOUT, || app.state().error.is_some());
    let error = app.state().error.unwrap();
    assert_eq!(error.op, OperationKind::Validation);
    assert!(error.message.contains("job_id"));
    assert_eq!(backend.create_calls(), 0);

    create(&app, "job_7", "home_1", "trade_9");
    let conversation_id = wait_for_active(&app);
    assert!(app.state().error.is_none());

    send(&app, &conversation_id, "   ");
    wait_until("empty body rejected", TIMEOUT, || app.state().error.is_some());
    assert!(app.current_messages().is_empty());

    send(&app, "nope", "hi");
    wait_until("unknown conversation", TIMEOUT, || {
        app.state()
            .error
            .is_some_and(|e| e.message.contains("unknown conversation"))
    });
}

#[test]
fn failed_create_leaves_the_store_unchanged() {
    let faults = Arc::new(ScriptedFaults::new());
    faults.fail_next(BackendOp::CreateConversation, 1);
    let backend = GatedBackend::with_faults(faults);
    let (_dir, app) = start(1_000, backend.clone());

    create(&app, "job_7", "home_1", "trade_9");
    wait_until("create error", TIMEOUT, || app.state().error.is_some());
    let state = app.state();
    assert_eq!(state.error.unwrap().op, OperationKind::CreateConversation);
    assert!(state.conversations.is_empty());
    assert!(!state.busy.creating_conversation);

    // Retry by re-dispatching.
    create(&app, "job_7", "home_1", "trade_9");
    wait_for_active(&app);
    assert!(app.state().error.is_none());
    assert_eq!(backend.inner.conversation_count(), 1);
}

#[test]
fn chat_list_groups_classifies_and_merges_unread() {
    let backend = GatedBackend::new();
    seed_conversation(&backend, "c1", "job_1", "trade_9", 10);
    seed_conversation(&backend, "c2", "job_2", "trade_9", 20);
    seed_conversation(&backend, "c3", "job_3", "trade_4", 30);
    backend.inner.set_unread("c2", 4);
    backend.inner.complete_job(CompletedJobDto {
        job_id: "job_3".into(),
        trader_id: Some("trade_4".into()),
        ..Default::default()
    });
    let (_dir, app) = start(1_000, backend.clone());

    app.dispatch(AppAction::RefreshChatList {
        auth_token: "token".into(),
        user_id: "home_1".into(),
    });
    wait_until("chat list", TIMEOUT, || app.chat_list().fetched_at.is_some());

    let list = app.chat_list();
    let active: Vec<&str> = list.active.iter().map(|c| c.conversation_id.as_str()).collect();
    let past: Vec<&str> = list.past.iter().map(|c| c.conversation_id.as_str()).collect();
    assert_eq!(active, vec!["c2"]);
    assert_eq!(past, vec!["c3"]);
    assert_eq!(list.active[0].unread_count, 4);
    assert_eq!(list.active[0].counterparty_id, "trade_9");
    assert_eq!(app.state().conversations.len(), 3);
    assert!(!app.state().busy.refreshing_chat_list);
}

#[test]
fn chat_list_refresh_is_suppressed_while_in_flight() {
    let backend = GatedBackend::new();
    seed_conversation(&backend, "c1", "job_1", "trade_9", 10);
    let (_dir, app) = start(1_000, backend.clone());
    let refresh = || {
        app.dispatch(AppAction::RefreshChatList {
            auth_token: "token".into(),
            user_id: "home_1".into(),
        })
    };

    backend.hold_chat_list();
    refresh();
    wait_until("refresh in flight", TIMEOUT, || {
        app.state().busy.refreshing_chat_list && backend.chat_list_calls() == 1
    });
    refresh();
    refresh();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(backend.chat_list_calls(), 1);

    backend.release_chat_list();
    wait_until("refresh done", TIMEOUT, || {
        !app.state().busy.refreshing_chat_list
    });
    assert_eq!(app.chat_list().active.len(), 1);

    refresh();
    wait_until("second refresh", TIMEOUT, || backend.chat_list_calls() == 2);
}

#[test]
fn chat_list_failure_keeps_previous_list() {
    let faults = Arc::new(ScriptedFaults::new());
    let backend = GatedBackend::with_faults(faults.clone());
    seed_conversation(&backend, "c1", "job_1", "trade_9", 10);
    let (_dir, app) = start(1_000, backend.clone());
    let refresh = || {
        app.dispatch(AppAction::RefreshChatList {
            auth_token: "token".into(),
            user_id: "home_1".into(),
        })
    };

    refresh();
    wait_until("first list", TIMEOUT, || app.chat_list().active.len() == 1);

    faults.fail_next(BackendOp::CompletedJobs, 1);
    refresh();
    wait_until("chat list error", TIMEOUT, || {
        app.state()
            .error
            .is_some_and(|e| e.op == OperationKind::ChatList && e.retryable)
    });
    assert_eq!(app.chat_list().active.len(), 1);
}

#[test]
fn mirror_restores_conversations_after_restart() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_string_lossy().to_string();
    write_config_json(
        &data_dir,
        serde_json::json!({
            "disable_network": true,
            "poll_interval_ms": 1_000,
            "mirror_cache": true,
        }),
    );

    let conversation_id = {
        let backend = GatedBackend::new();
        let app = ChatApp::with_backend(data_dir.clone(), backend);
        create(&app, "job_7", "home_1", "trade_9");
        let conversation_id = wait_for_active(&app);
        send(&app, &conversation_id, "Hello");
        wait_until("confirmed", TIMEOUT, || {
            bodies(&app.current_messages()) == vec![("Hello".to_string(), false)]
        });
        conversation_id
    };
    let mirror = dir.path().join("jobchat_cache.json");
    wait_until("mirror written", TIMEOUT, || {
        std::fs::read_to_string(&mirror).is_ok_and(|s| s.contains("Hello"))
    });

    let app = ChatApp::with_backend(data_dir, GatedBackend::new());
    wait_until("hydrated", TIMEOUT, || {
        app.state()
            .conversations
            .iter()
            .any(|c| c.id == conversation_id)
    });
}

#[test]
fn only_one_listener_receives_updates() {
    let backend = GatedBackend::new();
    let (_dir, app) = start(1_000, backend);
    let (first, first_updates) = TestReconciler::new();
    let (second, second_updates) = TestReconciler::new();
    app.listen_for_updates(Box::new(first));
    app.listen_for_updates(Box::new(second));

    create(&app, "job_7", "home_1", "trade_9");
    wait_for_active(&app);
    wait_until("updates delivered", TIMEOUT, || {
        !snapshots(&first_updates).is_empty()
    });
    assert!(snapshots(&second_updates).is_empty());

    let revs = revs(&first_updates);
    assert!(revs.windows(2).all(|w| w[0] < w[1]), "revs increase: {revs:?}");
}

#[test]
fn dropping_the_app_stops_polling() {
    let backend = GatedBackend::new();
    let (_dir, app) = start(50, backend.clone());
    create(&app, "job_7", "home_1", "trade_9");
    let conversation_id = wait_for_active(&app);
    wait_until("polling running", TIMEOUT, || {
        backend.list_calls(&conversation_id) >= 2
    });

    drop(app);
    std::thread::sleep(Duration::from_millis(200));
    let calls = backend.list_calls(&conversation_id);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(backend.list_calls(&conversation_id), calls);
}
