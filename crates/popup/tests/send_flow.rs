use popup::store::CHATS_KEY;
use popup::{FaultKind, JsonFileStore, MemoryStore, Rejection, ResponseEvent, ResponseOrchestrator, SendOutcome};
use providers::testing::{ScriptedProvider, ScriptedReply};
use providers::{CapabilityProvider, ContentPart, ProviderInput};
use shared::settings::PopupSettings;
use shared::{Availability, Capability, ChatsTable, MediaAttachment, MediaKind, MediaLimits, ProviderError, Role};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn popup_with(kv: Arc<MemoryStore>, providers: &[&ScriptedProvider]) -> ResponseOrchestrator {
    let providers = providers
        .iter()
        .map(|p| Arc::new((*p).clone()) as Arc<dyn CapabilityProvider>)
        .collect();
    popup::start(&PopupSettings::default(), kv, providers).await
}

fn image(name: &str) -> MediaAttachment {
    MediaAttachment::from_bytes(MediaKind::Image, name, "image/png", &[137, 80, 78, 71], &MediaLimits::default())
        .unwrap()
}

fn current_turns(popup: &ResponseOrchestrator) -> Vec<(Role, String)> {
    popup
        .registry()
        .current_chat()
        .map(|c| c.turns.iter().map(|t| (t.role, t.content.clone())).collect())
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn writer_reply_is_streamed_committed_and_saved_after_quiet_window() {
    let kv = Arc::new(MemoryStore::new());
    let writer = ScriptedProvider::new(Capability::Writer);
    writer.push_reply(ScriptedReply::Chunks(vec![
        "Soft rain on the roof,\n".into(),
        "puddles gather quiet light,\n".into(),
        "the street exhales slow.".into(),
    ]));
    let mut popup = popup_with(kv.clone(), &[&writer]).await;

    popup.open_capability(Capability::Writer).await;
    let outcome = popup.send("Write a haiku about rain.").await;

    let SendOutcome::Replied { chat_id, reply, fault } = outcome else {
        panic!("expected a reply");
    };
    assert_eq!(fault, None);
    assert_eq!(
        reply,
        "Soft rain on the roof,\npuddles gather quiet light,\nthe street exhales slow."
    );
    assert_eq!(popup.registry().current_chat_id(), Some(chat_id.as_str()));
    assert_eq!(popup.registry().current_chat().unwrap().title, "Chat #1");
    assert_eq!(
        current_turns(&popup),
        vec![
            (Role::User, "Write a haiku about rain.".to_string()),
            (Role::Assistant, reply.clone()),
        ]
    );
    let log = writer.log();
    assert_eq!(log.stream_inputs.len(), 1);
    assert!(log.generate_inputs.is_empty());

    // Nothing is written until the quiet window passes.
    assert_eq!(kv.writes(), 0);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(kv.writes(), 1);

    let saved: ChatsTable = serde_json::from_value(kv.raw(CHATS_KEY).unwrap()).unwrap();
    assert_eq!(saved.capability_count(), 1);
    let chats = saved.chats(Capability::Writer);
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].turns.len(), 2);
}

#[tokio::test]
async fn image_only_prompt_falls_back_to_text_stream_once() {
    let kv = Arc::new(MemoryStore::new());
    let prompt = ScriptedProvider::new(Capability::Prompt);
    prompt.push_reply(ScriptedReply::Fail(ProviderError::MultimodalUnsupported(
        "images are not supported".into(),
    )));
    prompt.push_reply(ScriptedReply::Chunks(vec!["I can only ".into(), "read text.".into()]));
    let mut popup = popup_with(kv, &[&prompt]).await;

    popup.open_capability(Capability::Prompt).await;
    assert_eq!(popup.stage_media(image("sky.png")).unwrap(), 1);
    let outcome = popup.send("").await;

    assert!(matches!(outcome, SendOutcome::Replied { fault: None, .. }));
    let chat = popup.registry().current_chat().unwrap();
    assert_eq!(chat.turns.len(), 2);
    assert_eq!(chat.turns[0].role, Role::User);
    assert_eq!(chat.turns[0].content, "");
    assert_eq!(chat.turns[0].media.len(), 1);
    assert_eq!(chat.turns[0].media[0].kind, MediaKind::Image);
    assert_eq!(chat.turns[1].content, "I can only read text.");

    let log = prompt.log();
    assert_eq!(log.generate_inputs.len(), 1);
    let ProviderInput::Multimodal(parts) = &log.generate_inputs[0] else {
        panic!("first attempt should be multimodal");
    };
    assert!(matches!(&parts[0], ContentPart::Text(t) if t.contains("analyze this media")));
    assert!(matches!(&parts[1], ContentPart::Image { .. }));

    assert_eq!(log.stream_inputs.len(), 1);
    let fallback = log.stream_inputs[0].text();
    assert!(fallback.starts_with("User uploaded media files"));
    assert!(!log.stream_inputs[0].has_media());

    assert!(popup.pending_media().is_empty());
}

#[tokio::test]
async fn unavailable_translator_reports_in_transcript_without_caching() {
    let kv = Arc::new(MemoryStore::new());
    let translator = ScriptedProvider::new(Capability::Translator);
    translator.set_availability(Some(Availability::Unavailable {
        reason: "the local model server could not be reached".into(),
    }));
    let mut popup = popup_with(kv, &[&translator]).await;

    popup.open_capability(Capability::Translator).await;
    let outcome = popup.send("Good morning").await;

    let SendOutcome::Replied { reply, fault, .. } = outcome else {
        panic!("expected a reply");
    };
    assert_eq!(fault, Some(FaultKind::Unavailable));
    assert!(reply.starts_with("Translator is not available"));

    let turns = current_turns(&popup);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1], (Role::Assistant, reply));

    assert!(!popup.sessions().has_session(Capability::Translator));
    let log = translator.log();
    assert_eq!(log.creates, 0);
    assert_eq!(log.generation_calls(), 0);
}

#[tokio::test]
async fn pending_model_is_reported_and_not_retried() {
    let kv = Arc::new(MemoryStore::new());
    let summarizer = ScriptedProvider::new(Capability::Summarizer);
    summarizer.set_availability(Some(Availability::PendingDownload));
    let mut popup = popup_with(kv, &[&summarizer]).await;

    popup.open_capability(Capability::Summarizer).await;
    let outcome = popup.send("Summarize this paragraph.").await;
    assert!(matches!(
        outcome,
        SendOutcome::Replied {
            fault: Some(FaultKind::ModelPending),
            ..
        }
    ));
    assert_eq!(summarizer.log().creates, 0);

    // Once the model is in place, the next send goes through.
    summarizer.set_availability(Some(Availability::Ready));
    let outcome = popup.send("Summarize this paragraph.").await;
    assert!(matches!(outcome, SendOutcome::Replied { fault: None, .. }));
    assert_eq!(current_turns(&popup).len(), 4);
}

#[tokio::test]
async fn empty_send_records_nothing_and_calls_no_provider() {
    let kv = Arc::new(MemoryStore::new());
    let writer = ScriptedProvider::new(Capability::Writer);
    let mut popup = popup_with(kv, &[&writer]).await;

    assert_eq!(
        popup.send("hello").await,
        SendOutcome::Rejected(Rejection::NoActiveCapability)
    );

    popup.open_capability(Capability::Writer).await;
    assert_eq!(popup.send("").await, SendOutcome::Rejected(Rejection::EmptyInput));
    assert_eq!(popup.send("   \n").await, SendOutcome::Rejected(Rejection::EmptyInput));

    assert!(popup.registry().list_chats(Capability::Writer).is_empty());
    let log = writer.log();
    assert_eq!(log.creates, 0);
    assert_eq!(log.generation_calls(), 0);
}

#[tokio::test]
async fn media_is_only_staged_for_prompt() {
    let kv = Arc::new(MemoryStore::new());
    let mut popup = popup_with(kv, &[]).await;

    assert!(popup.stage_media(image("a.png")).is_err());
    popup.open_capability(Capability::Summarizer).await;
    assert!(popup.stage_media(image("a.png")).is_err());

    popup.open_capability(Capability::Prompt).await;
    popup.stage_media(image("a.png")).unwrap();
    popup.stage_media(image("b.png")).unwrap();
    assert_eq!(popup.remove_media(0).unwrap().name, "a.png");
    assert_eq!(popup.pending_media().len(), 1);

    // Reopening a section starts with nothing staged.
    popup.open_capability(Capability::Prompt).await;
    assert!(popup.pending_media().is_empty());
}

#[tokio::test]
async fn generation_fault_commits_one_turn_and_drops_session() {
    let kv = Arc::new(MemoryStore::new());
    let rewriter = ScriptedProvider::new(Capability::Rewriter);
    rewriter.push_reply(ScriptedReply::Fail(ProviderError::Generation(
        "model crashed".into(),
    )));
    let mut popup = popup_with(kv, &[&rewriter]).await;

    popup.open_capability(Capability::Rewriter).await;
    let outcome = popup.send("make this friendlier").await;

    let SendOutcome::Replied { reply, fault, .. } = outcome else {
        panic!("expected a reply");
    };
    assert_eq!(fault, Some(FaultKind::Generation));
    assert!(reply.contains("model crashed"));
    let turns = current_turns(&popup);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].0, Role::Assistant);

    assert!(!popup.sessions().has_session(Capability::Rewriter));
    assert_eq!(popup.sessions().consecutive_faults(Capability::Rewriter), 1);

    // The next send builds a fresh session and resets the fault count.
    popup.send("make this friendlier").await;
    assert_eq!(rewriter.log().creates, 2);
    assert_eq!(popup.sessions().consecutive_faults(Capability::Rewriter), 0);
}

#[tokio::test]
async fn mid_stream_fault_commits_error_instead_of_partial_text() {
    let kv = Arc::new(MemoryStore::new());
    let proofreader = ScriptedProvider::new(Capability::Proofreader);
    proofreader.push_reply(ScriptedReply::BreakAfter(
        vec!["Their ".into(), "is".into()],
        "connection reset".into(),
    ));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut popup = popup_with(kv, &[&proofreader]).await.with_events(tx);

    popup.open_capability(Capability::Proofreader).await;
    let outcome = popup.send("Their is a cat").await;
    assert!(matches!(
        outcome,
        SendOutcome::Replied {
            fault: Some(FaultKind::Generation),
            ..
        }
    ));

    let turns = current_turns(&popup);
    assert_eq!(turns.len(), 2);
    assert!(turns[1].1.contains("connection reset"));
    assert!(!popup.sessions().has_session(Capability::Proofreader));

    let mut partials = Vec::new();
    let mut commits = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            ResponseEvent::Partial { delta, .. } => partials.push(delta),
            ResponseEvent::AssistantTurnCommitted { .. } => commits += 1,
            ResponseEvent::UserTurnRecorded { .. } => {}
        }
    }
    assert_eq!(partials, vec!["Their ".to_string(), "is".to_string()]);
    assert_eq!(commits, 1);
}

#[tokio::test]
async fn translator_replies_atomically_with_configured_languages() {
    let kv = Arc::new(MemoryStore::new());
    let translator = ScriptedProvider::new(Capability::Translator);
    translator.push_reply(ScriptedReply::text("Buenos días"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut popup = popup_with(kv, &[&translator]).await.with_events(tx);

    popup.open_capability(Capability::Translator).await;
    popup.send("Good morning").await;

    let log = translator.log();
    assert_eq!(log.generate_inputs.len(), 1);
    assert!(log.stream_inputs.is_empty());
    assert_eq!(log.create_options[0].source_language.as_deref(), Some("en"));
    assert_eq!(log.create_options[0].target_language.as_deref(), Some("es"));

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], ResponseEvent::UserTurnRecorded { .. }));
    assert!(matches!(
        &events[1],
        ResponseEvent::AssistantTurnCommitted { text, .. } if text == "Buenos días"
    ));
}

#[tokio::test]
async fn deleting_current_chat_then_sending_starts_a_new_one() {
    let kv = Arc::new(MemoryStore::new());
    let writer = ScriptedProvider::new(Capability::Writer);
    let mut popup = popup_with(kv, &[&writer]).await;

    popup.open_capability(Capability::Writer).await;
    popup.send("first").await;
    let first = popup.registry().current_chat_id().unwrap().to_string();
    let second = popup.registry_mut().create_chat(Capability::Writer);
    assert_eq!(popup.registry().current_chat_id(), Some(second.as_str()));

    popup.registry_mut().delete_chat(Capability::Writer, &second).unwrap();
    assert_eq!(popup.registry().current_chat_id(), Some(first.as_str()));

    popup.registry_mut().delete_chat(Capability::Writer, &first).unwrap();
    assert_eq!(popup.registry().current_chat_id(), None);

    popup.send("again").await;
    let chats = popup.registry().list_chats(Capability::Writer);
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].title, "Chat #1");
    assert_eq!(popup.registry().current_chat_id(), Some(chats[0].id.as_str()));
}

#[tokio::test]
async fn leaving_a_capability_tears_its_session_down() {
    let kv = Arc::new(MemoryStore::new());
    let writer = ScriptedProvider::new(Capability::Writer);
    let rewriter = ScriptedProvider::new(Capability::Rewriter);
    let mut popup = popup_with(kv, &[&writer, &rewriter]).await;

    popup.open_capability(Capability::Writer).await;
    popup.send("draft an email").await;
    assert!(popup.sessions().has_session(Capability::Writer));

    // Moving to another section destroys the one left behind.
    popup.open_capability(Capability::Rewriter).await;
    assert_eq!(writer.log().destroys, 1);
    assert!(!popup.sessions().has_session(Capability::Writer));

    popup.send("rephrase this").await;
    popup.leave_capability().await;
    assert_eq!(rewriter.log().destroys, 1);
    assert_eq!(popup.registry().active_capability(), None);
    assert_eq!(popup.registry().current_chat_id(), None);
}

#[tokio::test]
async fn reload_restores_turns_in_order_without_payloads() {
    let dir = tempfile::TempDir::new().unwrap();
    let prompt = ScriptedProvider::new(Capability::Prompt);
    let providers = || vec![Arc::new(prompt.clone()) as Arc<dyn CapabilityProvider>];

    let chat_id = {
        let mut popup = popup::start(
            &PopupSettings::default(),
            Arc::new(JsonFileStore::new(dir.path())),
            providers(),
        )
        .await;
        popup.open_capability(Capability::Prompt).await;
        popup.send("one").await;
        popup.stage_media(image("photo.png")).unwrap();
        popup.send("two").await;
        popup.send("three").await;
        popup.shutdown().await;
        popup.registry().current_chat_id().unwrap().to_string()
    };

    let raw = std::fs::read_to_string(dir.path().join("chatsData.json")).unwrap();
    assert!(!raw.contains("base64"));

    let mut popup = popup::start(
        &PopupSettings::default(),
        Arc::new(JsonFileStore::new(dir.path())),
        providers(),
    )
    .await;
    popup.open_capability(Capability::Prompt).await;
    assert_eq!(popup.registry().current_chat_id(), Some(chat_id.as_str()));

    let chat = popup.registry().current_chat().unwrap();
    let contents: Vec<_> = chat.turns.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents[0], "one");
    assert_eq!(contents[2], "two");
    assert_eq!(contents[4], "three");
    assert_eq!(chat.turns.len(), 6);
    assert_eq!(chat.turns[2].media.len(), 1);
    assert_eq!(chat.turns[2].media[0].name, "photo.png");
    assert_eq!(chat.turns[2].media[0].mime_type, "image/png");
}

#[tokio::test]
async fn failed_text_fallback_is_a_generation_fault() {
    let kv = Arc::new(MemoryStore::new());
    let prompt = ScriptedProvider::new(Capability::Prompt);
    prompt.push_reply(ScriptedReply::Fail(ProviderError::MultimodalUnsupported(
        "images are not supported".into(),
    )));
    prompt.push_reply(ScriptedReply::BreakAfter(
        vec!["I see ".into()],
        "stream dropped".into(),
    ));
    let mut popup = popup_with(kv, &[&prompt]).await;

    popup.open_capability(Capability::Prompt).await;
    popup.stage_media(image("chart.png")).unwrap();
    let outcome = popup.send("What does this show?").await;

    let SendOutcome::Replied { reply, fault, .. } = outcome else {
        panic!("expected a reply");
    };
    assert_eq!(fault, Some(FaultKind::Generation));
    assert!(reply.contains("stream dropped"));
    assert_eq!(
        current_turns(&popup),
        vec![
            (Role::User, "What does this show?".to_string()),
            (Role::Assistant, reply),
        ]
    );
    assert!(!popup.sessions().has_session(Capability::Prompt));
    let log = prompt.log();
    assert_eq!(log.generate_inputs.len(), 1);
    assert_eq!(log.stream_inputs.len(), 1);
    assert!(log.stream_inputs[0].text().starts_with("What does this show?"));

    // A fallback that fails before streaming ends the same way.
    prompt.push_reply(ScriptedReply::Fail(ProviderError::MultimodalUnsupported(
        "images are not supported".into(),
    )));
    prompt.push_reply(ScriptedReply::Fail(ProviderError::Generation(
        "engine stopped".into(),
    )));
    popup.stage_media(image("chart.png")).unwrap();
    let outcome = popup.send("And now?").await;

    assert!(matches!(
        &outcome,
        SendOutcome::Replied { reply, fault: Some(FaultKind::Generation), .. }
            if reply.contains("engine stopped")
    ));
    assert_eq!(current_turns(&popup).len(), 4);
    assert!(!popup.sessions().has_session(Capability::Prompt));
    let log = prompt.log();
    assert_eq!(log.generate_inputs.len(), 2);
    assert_eq!(log.stream_inputs.len(), 2);
}
