//! Terminal frontend.
//!
//! Reads commands from stdin, forwards them to the engine and prints what
//! the engine reports: transcript units, status changes, errors and the
//! final evaluation.

use anyhow::Context;
use pratique_bridge::{
    MessageFromEngine, MessageToEngine,
    notification::NotificationType,
    persona::AvatarPersona,
    session::SessionStatus,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};

pub mod formatting;

const HELP: &str = "Comandos:
  start [avatar]   inicia uma sessão (padrão: o avatar configurado)
  say <texto>      envia uma mensagem de texto
  status           mostra o estado da sessão
  end              encerra e avalia a sessão
  cancel           abandona a sessão sem avaliação
  personas         lista os avatares
  devices          lista os dispositivos de áudio
  device <id>      seleciona um dispositivo de áudio
  quit             sai";

/// A parsed line of user input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Engine(MessageToEngine),
    Help,
    Quit,
}

/// Parses one input line. Returns `None` for blank lines and unknown
/// commands.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let argument = (!rest.is_empty()).then(|| rest.to_string());

    let message = match word.to_lowercase().as_str() {
        "start" => MessageToEngine::StartSessionRequest { persona: argument },
        "say" => MessageToEngine::SendTextRequest(argument?),
        "status" => MessageToEngine::SessionStatusRequest,
        "end" => MessageToEngine::EndSessionRequest,
        "cancel" => MessageToEngine::CancelSessionRequest,
        "personas" => MessageToEngine::PersonasListRequest,
        "devices" => MessageToEngine::AudioDevicesListRequest,
        "device" => MessageToEngine::SelectAudioDevice(argument?),
        "config" => MessageToEngine::ConfigurationRequest,
        "help" => return Some(Command::Help),
        "quit" | "exit" => return Some(Command::Quit),
        _ => return None,
    };
    Some(Command::Engine(message))
}

/// What the console remembers between engine messages.
#[derive(Debug, Default)]
struct ConsoleState {
    persona: Option<AvatarPersona>,
    last_status_line: Option<String>,
}

impl ConsoleState {
    fn persona_name(&self) -> &str {
        self.persona.as_ref().map(|persona| persona.name.as_str()).unwrap_or("Avatar")
    }

    fn status_line(&self, status: &SessionStatus) -> String {
        let feminine = self.persona.as_ref().is_some_and(|persona| persona.feminine);
        formatting::status_message(status, self.persona_name(), feminine)
    }

    fn handle(&mut self, message: MessageFromEngine) {
        match message {
            MessageFromEngine::NotificationMessage(notification) => {
                let prefix = match notification.notification_type {
                    NotificationType::Info => "i",
                    NotificationType::Success => "+",
                    NotificationType::Warning => "!",
                    NotificationType::Error => "x",
                };
                println!("[{prefix}] {}", notification.message);
            }
            MessageFromEngine::ConfigurationResponse(config) => println!("{config:#?}"),
            MessageFromEngine::AudioDevicesListResponse(devices) => {
                for device in devices {
                    let marker = if device.selected { "*" } else { " " };
                    println!("{marker} {:?} {} ({})", device.direction, device.description, device.id);
                }
            }
            MessageFromEngine::PersonasListResponse(personas) => {
                for persona in personas {
                    println!("{} ({}, {}): {}", persona.name, persona.accent, persona.voice, persona.description);
                }
            }
            MessageFromEngine::SessionStartedResponse {
                persona,
                remaining_seconds,
            } => {
                println!(
                    "Sessão com {} iniciada, {} restantes.",
                    persona.name,
                    formatting::format_remaining(remaining_seconds)
                );
                self.persona = Some(persona);
                self.last_status_line = None;
            }
            MessageFromEngine::SessionStatusUpdate(status) => {
                let line = self.status_line(&status);
                if self.last_status_line.as_deref() != Some(line.as_str()) {
                    println!("-- {line}");
                    self.last_status_line = Some(line);
                }
            }
            MessageFromEngine::SessionStatusResponse {
                status,
                output_level,
            } => {
                println!(
                    "-- {} | {} restantes | nível {:.2}",
                    self.status_line(&status),
                    formatting::format_remaining(status.remaining_seconds),
                    output_level
                );
            }
            MessageFromEngine::TranscriptUpdate { text, is_user } => {
                println!("{}", formatting::format_transcript(&text, is_user, self.persona_name()));
            }
            MessageFromEngine::SessionErrorResponse(error) => println!("[x] {error}"),
            MessageFromEngine::SessionFinished {
                result,
                reason,
                final_minutes,
            } => {
                if reason == pratique_bridge::session::EndReason::CreditExhausted {
                    println!("Seus créditos acabaram. Adicione créditos para continuar praticando!");
                }
                println!("{}", formatting::format_result(&result));
                println!("Créditos restantes: {final_minutes} min");
                self.persona = None;
            }
            MessageFromEngine::SessionCancelled { final_minutes } => {
                println!("Sessão cancelada. Créditos restantes: {final_minutes} min");
                self.persona = None;
            }
        }
    }
}

async fn console_loop(
    mut rx: mpsc::Receiver<MessageFromEngine>,
    tx: mpsc::Sender<MessageToEngine>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state = ConsoleState::default();
    println!("{HELP}");

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => state.handle(message),
                None => {
                    log::warn!("The engine stopped");
                    break;
                }
            },
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read from stdin")? else {
                    break;
                };
                match parse_command(&line) {
                    Some(Command::Engine(message)) => tx
                        .send(message)
                        .await
                        .context("the engine is not running")?,
                    Some(Command::Help) => println!("{HELP}"),
                    Some(Command::Quit) => break,
                    None if line.trim().is_empty() => {}
                    None => println!("Comando desconhecido. Digite \"help\"."),
                }
            }
        }
    }

    Ok(())
}

/// Runs the terminal frontend until stdin closes or the user quits.
pub fn run(
    rx: mpsc::Receiver<MessageFromEngine>,
    tx: mpsc::Sender<MessageToEngine>,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the console runtime")?;
    runtime.block_on(console_loop(rx, tx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_parsed() {
        assert_eq!(
            parse_command("start"),
            Some(Command::Engine(MessageToEngine::StartSessionRequest { persona: None }))
        );
        assert_eq!(
            parse_command("  START  Maya "),
            Some(Command::Engine(MessageToEngine::StartSessionRequest {
                persona: Some("Maya".to_string())
            }))
        );
        assert_eq!(
            parse_command("say I went to the beach"),
            Some(Command::Engine(MessageToEngine::SendTextRequest(
                "I went to the beach".to_string()
            )))
        );
        assert_eq!(parse_command("quit"), Some(Command::Quit));
    }

    #[test]
    fn incomplete_commands_are_rejected() {
        assert_eq!(parse_command("say"), None);
        assert_eq!(parse_command("device"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("dance"), None);
    }
}
