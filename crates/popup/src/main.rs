use anyhow::Result;
use popup::{ResponseEvent, ResponseOrchestrator, SendOutcome};
use shared::Capability;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, Notify};

const HELP: &str = "\
Commands:
  :open <capability>   rewriter, translator, prompt, writer, summarizer, proofreader
  :back                return to the capability menu
  :new                 start a new chat
  :chats               list chats
  :switch <n>          switch to chat n
  :rename <n> <title>  rename chat n
  :delete <n>          delete chat n
  :attach <path>       stage an image or audio file (prompt only)
  :detach <n>          remove staged file n
  :help                show this help
  :quit                exit
Anything else is sent to the open capability.";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (settings, _) = popup::config::load_settings_or_default();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut popup = popup::start_default(&settings).await.with_events(tx);
    let replied = Arc::new(Notify::new());
    let printer = tokio::spawn(print_events(rx, replied.clone()));

    println!("{}", HELP);
    print_menu();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = next_line(&mut lines).await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with(':') {
            send(&mut popup, line, &replied).await;
            continue;
        }

        let (command, rest) = line[1..]
            .split_once(' ')
            .map(|(c, r)| (c, r.trim()))
            .unwrap_or((&line[1..], ""));
        match command {
            "quit" | "q" => break,
            "help" => println!("{}", HELP),
            "open" => match rest.parse::<Capability>() {
                Ok(capability) => {
                    popup.open_capability(capability).await;
                    println!("== {} ==", capability.display_name());
                    print_chats(&popup);
                    println!("assistant> {}", capability.first_prompt());
                }
                Err(e) => println!("{}", e),
            },
            "back" => {
                popup.leave_capability().await;
                print_menu();
            }
            "new" => match popup.registry().active_capability() {
                Some(capability) => {
                    popup.registry_mut().create_chat(capability);
                    print_chats(&popup);
                    println!("assistant> {}", capability.first_prompt());
                }
                None => println!("Open a capability first."),
            },
            "chats" => print_chats(&popup),
            "switch" => match chat_at(&popup, rest) {
                Some((_, id)) => {
                    if let Err(e) = popup.registry_mut().switch_chat(&id) {
                        println!("{}", e);
                    }
                    print_transcript(&popup);
                }
                None => println!("No such chat."),
            },
            "rename" => {
                let (index, title) = rest.split_once(' ').unwrap_or((rest, ""));
                match chat_at(&popup, index) {
                    Some((capability, id)) => {
                        match popup.registry_mut().rename_chat(capability, &id, title) {
                            Ok(true) => print_chats(&popup),
                            Ok(false) => println!("Title unchanged."),
                            Err(e) => println!("{}", e),
                        }
                    }
                    None => println!("No such chat."),
                }
            }
            "delete" => match chat_at(&popup, rest) {
                Some((capability, id)) => {
                    if confirm(&mut lines, "Delete this chat? [y/N] ").await? {
                        if let Err(e) = popup.registry_mut().delete_chat(capability, &id) {
                            println!("{}", e);
                        }
                        print_chats(&popup);
                    }
                }
                None => println!("No such chat."),
            },
            "attach" => match popup.attach_path(Path::new(rest)) {
                Ok(count) => println!("{} file(s) staged.", count),
                Err(e) => println!("{}", e),
            },
            "detach" => {
                let removed = rest
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| popup.remove_media(i));
                match removed {
                    Some(m) => println!("Removed {}.", m.name),
                    None => println!("No such file."),
                }
            }
            other => println!("Unknown command :{} (try :help)", other),
        }
    }

    popup.shutdown().await;
    drop(popup);
    let _ = printer.await;
    Ok(())
}

async fn next_line(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    print!("> ");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?)
}

async fn confirm(lines: &mut Lines<BufReader<Stdin>>, question: &str) -> Result<bool> {
    print!("{}", question);
    std::io::stdout().flush()?;
    let answer = lines.next_line().await?.unwrap_or_default();
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn send(popup: &mut ResponseOrchestrator, text: &str, replied: &Notify) {
    match popup.send(text).await {
        SendOutcome::Rejected(rejection) => {
            tracing::debug!(?rejection, "nothing sent");
            if popup.registry().active_capability().is_none() {
                println!("Open a capability first (:open <capability>).");
            }
        }
        SendOutcome::Replied { .. } => {
            // Let the printer finish the reply before the next prompt.
            let _ = tokio::time::timeout(Duration::from_secs(1), replied.notified()).await;
        }
    }
}

/// Prints streamed chunks as they arrive and atomic replies whole.
async fn print_events(mut rx: mpsc::UnboundedReceiver<ResponseEvent>, replied: Arc<Notify>) {
    let mut streaming = false;
    while let Some(event) = rx.recv().await {
        match event {
            ResponseEvent::UserTurnRecorded { .. } => {}
            ResponseEvent::Partial { delta, .. } => {
                if !streaming {
                    print!("assistant> ");
                    streaming = true;
                }
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            }
            ResponseEvent::AssistantTurnCommitted { text, .. } => {
                if streaming {
                    println!();
                } else {
                    println!("assistant> {}", text);
                }
                streaming = false;
                replied.notify_one();
            }
        }
    }
}

fn print_menu() {
    println!("Capabilities:");
    for capability in Capability::all() {
        println!("  {:<12} {}", capability.as_str(), capability.display_name());
    }
}

fn print_chats(popup: &ResponseOrchestrator) {
    let registry = popup.registry();
    let Some(capability) = registry.active_capability() else {
        println!("Open a capability first.");
        return;
    };
    let current = registry.current_chat_id();
    for (i, chat) in registry.list_chats(capability).iter().enumerate() {
        let marker = if Some(chat.id.as_str()) == current { "*" } else { " " };
        println!("{} {}. {}", marker, i + 1, chat.title);
    }
}

fn print_transcript(popup: &ResponseOrchestrator) {
    let Some(chat) = popup.registry().current_chat() else {
        return;
    };
    println!("== {} ==", chat.title);
    for turn in &chat.turns {
        let who = match turn.role {
            shared::Role::User => "you",
            shared::Role::Assistant => "assistant",
        };
        let content = if turn.content.is_empty() {
            "(Media uploaded)"
        } else {
            turn.content.as_str()
        };
        println!("{}> {}", who, content);
        for media in &turn.media {
            println!("    [{}: {}]", media.kind, media.name);
        }
    }
}

/// The active capability and id of the 1-based chat `index`.
fn chat_at(popup: &ResponseOrchestrator, index: &str) -> Option<(Capability, String)> {
    let registry = popup.registry();
    let capability = registry.active_capability()?;
    let n: usize = index.trim().parse().ok()?;
    registry
        .list_chats(capability)
        .into_iter()
        .nth(n.checked_sub(1)?)
        .map(|c| (capability, c.id))
}
