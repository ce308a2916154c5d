use std::sync::Arc;

use tracing::debug;

use crate::llm::Generate;
use crate::platform::InboundUpdate;

pub const WELCOME_TEXT: &str = "\
🤖 Hello! I'm your Gemini AI Assistant.

Send me any text message and I'll generate a response using Google's Gemini AI.

Features:
• AI-powered responses
• Fast and reliable
• Always learning

Just type your message and I'll help you!";

pub const HELP_TEXT: &str = "\
ℹ️ How to use this bot:

• Just send me any text message
• I'll respond using Gemini AI
• You can ask questions, get ideas, or just chat!

Commands:
/start - Start the bot
/help - Show this help message

No voice messages - text only!";

pub const EMPTY_TEXT_PROMPT: &str = "Please send a text message to chat!";

pub const UNKNOWN_COMMAND_TEXT: &str =
    "Sorry, I don't recognize that command. Use /help to see what I can do.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
}

/// What an inbound text asks the bot to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent<'a> {
    Empty,
    Command(Command),
    UnknownCommand(String),
    /// A `/cmd@name` command aimed at a different bot in the same chat.
    OtherBot,
    Prompt(&'a str),
}

/// Classify a message. A command is a message whose very first character
/// is `/`; its name is the first word, matched case-insensitively. An
/// `@name` suffix must match `bot_username` when that is known.
pub fn classify<'a>(text: &'a str, bot_username: Option<&str>) -> Intent<'a> {
    if text.trim().is_empty() {
        return Intent::Empty;
    }

    let Some(rest) = text.strip_prefix('/') else {
        return Intent::Prompt(text);
    };

    let word = rest.split(char::is_whitespace).next().unwrap_or_default();
    let (name, target) = match word.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (word, None),
    };

    if let (Some(target), Some(me)) = (target, bot_username) {
        if !target.eq_ignore_ascii_case(me.trim_start_matches('@')) {
            return Intent::OtherBot;
        }
    }

    let name = name.to_lowercase();
    match name.as_str() {
        "start" => Intent::Command(Command::Start),
        "help" => Intent::Command(Command::Help),
        _ => Intent::UnknownCommand(name),
    }
}

/// Turns an inbound update into the reply text for that chat.
#[derive(Clone)]
pub struct Interpreter {
    generator: Arc<dyn Generate>,
    bot_username: Option<String>,
}

impl Interpreter {
    pub fn new(generator: Arc<dyn Generate>, bot_username: Option<String>) -> Self {
        Self {
            generator,
            bot_username,
        }
    }

    pub fn classify<'a>(&self, text: &'a str) -> Intent<'a> {
        classify(text, self.bot_username.as_deref())
    }

    /// `None` only for commands addressed to another bot, which get no reply.
    pub async fn interpret(&self, update: &InboundUpdate) -> Option<String> {
        let reply = match self.classify(&update.text) {
            Intent::Empty => EMPTY_TEXT_PROMPT.to_string(),
            Intent::Command(Command::Start) => WELCOME_TEXT.to_string(),
            Intent::Command(Command::Help) => HELP_TEXT.to_string(),
            Intent::UnknownCommand(name) => {
                debug!("Unknown command: /{}", name);
                UNKNOWN_COMMAND_TEXT.to_string()
            }
            Intent::OtherBot => return None,
            Intent::Prompt(prompt) => self.generator.generate(prompt).await,
        };
        Some(reply)
    }
}
