//! Command-line arguments and the interactive chat loop.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;

use crate::consent::Consent;
use crate::controller::{ChatController, ChatEvent, SendOutcome};
use crate::session::group_sessions;
use crate::types::ChatSession;

#[derive(Parser, Debug)]
#[command(name = "chatdeck", version)]
#[command(about = "Chat with several LLM providers from the terminal")]
pub struct Cli {
    /// Model to select at startup (display name, see /models)
    #[arg(short, long, value_name = "NAME")]
    pub model: Option<String>,

    /// Config file (default ~/.chatdeck/config.toml)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory for saved chats
    #[arg(long, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Keep chats in memory only, never touching the data directory
    #[arg(long)]
    pub ephemeral: bool,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

const HELP: &str = "\
Commands:
  /help              Show this help
  /new               Start a new chat
  /status            Show the model, chat and saving state
  /sessions          List chats (current marked with *)
  /switch <n|id>     Switch to a chat
  /delete [n|id]     Delete a chat (default: the current one)
  /models            List available models
  /model [name]      Show or select the model
  /consent yes|no    Decide whether chats are saved on this machine
  /quit              Leave
Anything else is sent to the selected model.";

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Empty,
    Message(String),
    Help,
    New,
    Status,
    Sessions,
    Switch(String),
    Delete(Option<String>),
    Models,
    Model(Option<String>),
    Consent(Option<bool>),
    Quit,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    if !trimmed.starts_with('/') {
        return Input::Message(line.to_string());
    }

    let (command, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, Some(rest.trim().to_string())),
        None => (trimmed, None),
    };
    let arg = arg.filter(|a| !a.is_empty());

    match (command.to_lowercase().as_str(), arg) {
        ("/help", _) => Input::Help,
        ("/new", _) => Input::New,
        ("/status", _) => Input::Status,
        ("/sessions", _) => Input::Sessions,
        ("/switch", Some(target)) => Input::Switch(target),
        ("/delete", target) => Input::Delete(target),
        ("/models", _) => Input::Models,
        ("/model", name) => Input::Model(name),
        ("/consent", None) => Input::Consent(None),
        ("/consent", Some(answer)) => match parse_yes_no(&answer) {
            Some(granted) => Input::Consent(Some(granted)),
            None => Input::Unknown(trimmed.to_string()),
        },
        ("/quit" | "/exit", _) => Input::Quit,
        _ => Input::Unknown(trimmed.to_string()),
    }
}

fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Sessions in the order `/sessions` numbers them.
fn display_order(sessions: &[ChatSession]) -> Vec<&ChatSession> {
    group_sessions(sessions)
        .into_iter()
        .flat_map(|group| group.sessions)
        .collect()
}

/// Resolve a 1-based number from `/sessions` or a full session id.
pub fn resolve_session(target: &str, sessions: &[ChatSession]) -> Option<String> {
    let ordered = display_order(sessions);
    if let Ok(n) = target.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| ordered.get(i))
            .map(|s| s.id.clone());
    }
    ordered
        .into_iter()
        .find(|s| s.id == target)
        .map(|s| s.id.clone())
}

/// Line-oriented chat front-end over any async reader and writer.
pub struct ChatLoop<R, W> {
    controller: ChatController,
    lines: Lines<R>,
    out: W,
    events: mpsc::UnboundedReceiver<ChatEvent>,
}

impl<R: AsyncBufRead + Unpin, W: Write> ChatLoop<R, W> {
    pub fn new(controller: ChatController, input: R, out: W) -> Self {
        let events = controller.subscribe();
        Self {
            controller,
            lines: input.lines(),
            out,
            events,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        writeln!(
            self.out,
            "chatdeck - model: {} (type /help for commands)",
            self.controller.current_model()
        )?;
        self.ask_consent().await?;

        loop {
            write!(self.out, "You > ")?;
            self.out.flush()?;
            let Some(line) = self.lines.next_line().await? else {
                break;
            };

            match parse_input(&line) {
                Input::Empty => {}
                Input::Message(text) => self.send(&text).await?,
                Input::Help => writeln!(self.out, "{}", HELP)?,
                Input::New => {
                    self.controller.create_new_chat();
                    writeln!(self.out, "[New chat]")?;
                }
                Input::Status => self.status()?,
                Input::Sessions => self.list_sessions()?,
                Input::Switch(target) => self.switch(&target)?,
                Input::Delete(target) => self.delete(target).await?,
                Input::Models => self.list_models()?,
                Input::Model(None) => {
                    writeln!(self.out, "Current model: {}", self.controller.current_model())?
                }
                Input::Model(Some(name)) => match self.controller.set_model(&name) {
                    Ok(()) => writeln!(self.out, "[Model: {}]", name)?,
                    Err(e) => writeln!(self.out, "[{}; see /models]", e)?,
                },
                Input::Consent(None) => {
                    writeln!(self.out, "Saving chats: {}", describe(self.controller.consent()))?
                }
                Input::Consent(Some(granted)) => self.decide_consent(granted)?,
                Input::Quit => break,
                Input::Unknown(command) => {
                    writeln!(self.out, "Unknown command: {} (try /help)", command)?
                }
            }
        }

        writeln!(self.out, "Goodbye!")?;
        Ok(())
    }

    async fn ask_consent(&mut self) -> Result<()> {
        if self.controller.consent() != Consent::Undecided {
            return Ok(());
        }
        write!(self.out, "Save chats on this machine? [y/N] ")?;
        self.out.flush()?;
        let Some(answer) = self.lines.next_line().await? else {
            return Ok(());
        };
        match parse_yes_no(&answer) {
            Some(granted) => self.decide_consent(granted)?,
            None => writeln!(
                self.out,
                "Chats stay in memory until you decide with /consent yes|no."
            )?,
        }
        Ok(())
    }

    fn decide_consent(&mut self, granted: bool) -> Result<()> {
        if self.controller.decide_consent(granted) {
            writeln!(self.out, "Saving chats: {}", describe(self.controller.consent()))?;
        } else {
            writeln!(
                self.out,
                "Already decided (saving chats: {})",
                describe(self.controller.consent())
            )?;
        }
        Ok(())
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        let Some(session_id) = self.controller.current_session_id() else {
            return Ok(());
        };
        let controller = self.controller.clone();
        let send = controller.send_message(text);
        tokio::pin!(send);

        write!(self.out, "\nAssistant > ")?;
        self.out.flush()?;

        let events = &mut self.events;
        let out = &mut self.out;
        let outcome = loop {
            tokio::select! {
                outcome = &mut send => break outcome,
                Some(event) = events.recv() => print_delta(out, &session_id, &event)?,
            }
        };
        while let Ok(event) = self.events.try_recv() {
            print_delta(&mut self.out, &session_id, &event)?;
        }

        match outcome {
            SendOutcome::Completed | SendOutcome::Ignored => {}
            SendOutcome::Failed => {
                if let Some(last) = self.controller.messages().last() {
                    write!(self.out, "{}", last.content)?;
                }
            }
            SendOutcome::Busy => write!(self.out, "[A reply is still streaming in this chat]")?,
        }
        writeln!(self.out, "\n")?;
        Ok(())
    }

    fn status(&mut self) -> Result<()> {
        let sessions = self.controller.sessions();
        let current = self.controller.current_session_id();
        let title = sessions
            .iter()
            .find(|s| current.as_deref() == Some(s.id.as_str()))
            .map_or("-", |s| s.title.as_str());
        let replying = if self.controller.is_typing() { "yes" } else { "no" };

        writeln!(self.out, "Model: {}", self.controller.current_model())?;
        writeln!(
            self.out,
            "Chat: {} ({} messages)",
            title,
            self.controller.messages().len()
        )?;
        writeln!(self.out, "Replying: {}", replying)?;
        writeln!(self.out, "Saving chats: {}", describe(self.controller.consent()))?;
        Ok(())
    }

    fn list_sessions(&mut self) -> Result<()> {
        let sessions = self.controller.sessions();
        let current = self.controller.current_session_id();
        let mut n = 0;
        for group in group_sessions(&sessions) {
            writeln!(self.out, "{}", group.label)?;
            for session in group.sessions {
                n += 1;
                let marker = if current.as_deref() == Some(session.id.as_str()) {
                    '*'
                } else {
                    ' '
                };
                writeln!(
                    self.out,
                    " {} {:>2}. {} ({} messages)",
                    marker,
                    n,
                    session.title,
                    session.messages.len()
                )?;
            }
        }
        Ok(())
    }

    fn switch(&mut self, target: &str) -> Result<()> {
        let sessions = self.controller.sessions();
        match resolve_session(target, &sessions) {
            Some(id) if self.controller.switch_session(&id) => {
                for message in self.controller.messages() {
                    writeln!(self.out, "{} > {}", message.role.as_str(), message.content)?;
                }
            }
            _ => writeln!(self.out, "No chat '{}' (see /sessions)", target)?,
        }
        Ok(())
    }

    async fn delete(&mut self, target: Option<String>) -> Result<()> {
        let sessions = self.controller.sessions();
        let id = match target {
            Some(target) => resolve_session(&target, &sessions),
            None => self.controller.current_session_id(),
        };
        let Some(session) = id.and_then(|id| sessions.iter().find(|s| s.id == id)) else {
            writeln!(self.out, "No such chat (see /sessions)")?;
            return Ok(());
        };

        write!(self.out, "Delete \"{}\"? [y/N] ", session.title)?;
        self.out.flush()?;
        let answer = self.lines.next_line().await?.unwrap_or_default();
        if parse_yes_no(&answer) == Some(true) && self.controller.delete_session(&session.id) {
            writeln!(self.out, "[Deleted]")?;
        } else {
            writeln!(self.out, "[Kept]")?;
        }
        Ok(())
    }

    fn list_models(&mut self) -> Result<()> {
        let current = self.controller.current_model();
        for name in self.controller.available_models() {
            let marker = if name == current { '*' } else { ' ' };
            writeln!(self.out, " {} {}", marker, name)?;
        }
        Ok(())
    }
}

fn print_delta(out: &mut impl Write, session_id: &str, event: &ChatEvent) -> Result<()> {
    if let ChatEvent::Delta { session_id: target, text } = event {
        if target == session_id {
            write!(out, "{}", text)?;
            out.flush()?;
        }
    }
    Ok(())
}

fn describe(consent: Consent) -> &'static str {
    match consent {
        Consent::Undecided => "undecided (in memory only)",
        Consent::Granted => "yes",
        Consent::Denied => "no",
    }
}
