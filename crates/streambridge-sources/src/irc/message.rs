//! Decoded chat messages.

use std::collections::HashMap;

use super::parser::IrcLine;
use crate::error::{SourceError, SourceResult};

/// Sender recorded for lines no decoder attributes to a user.
pub const SYSTEM_SENDER: &str = "[SYSTEM]";

/// An inbound chat line with sender and channel resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub tags: HashMap<String, String>,
    pub prefix: String,
    pub sender: String,
    pub channel: String,
    pub command: String,
    pub trailer: String,
    pub args: Vec<String>,
}

impl ChatMessage {
    pub fn is_privmsg(&self) -> bool {
        self.command == "PRIVMSG"
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

fn decode_error(command: &str, reason: &'static str) -> SourceError {
    SourceError::Decode {
        command: command.to_string(),
        reason,
    }
}

/// Builds a [`ChatMessage`] from a parsed line.
///
/// # Errors
///
/// Returns [`SourceError::Decode`] when a `PRIVMSG` or `JOIN` lacks the
/// fields it must carry.
pub fn decode(line: IrcLine) -> SourceResult<ChatMessage> {
    let IrcLine {
        tags,
        prefix,
        command,
    } = line;
    let prefix = prefix.unwrap_or_default();
    let name = command.name;
    let args = command.args;

    let mut sender = SYSTEM_SENDER.to_string();
    let mut channel = String::new();

    match name.as_str() {
        "PRIVMSG" => {
            if args.len() < 2 || args[0].len() < 2 {
                return Err(decode_error(&name, "expected a channel and a message"));
            }
            let Some((nick, _)) = prefix.split_once('!') else {
                return Err(decode_error(&name, "could not determine sender"));
            };
            sender = nick.to_string();
            channel = strip_channel_marker(&args[0]).to_string();
        }
        "JOIN" => {
            if args.is_empty() {
                return Err(decode_error(&name, "expected a channel"));
            }
        }
        "NOTICE" => {
            if let Some(target) = args.first()
                && target.len() > 1
            {
                channel = strip_channel_marker(target).to_string();
            }
        }
        _ => {}
    }

    Ok(ChatMessage {
        tags: tags.into_iter().map(|t| (t.key, t.value)).collect(),
        prefix,
        sender,
        channel,
        command: name,
        trailer: args.last().cloned().unwrap_or_default(),
        args,
    })
}

fn strip_channel_marker(target: &str) -> &str {
    let mut chars = target.chars();
    chars.next();
    chars.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::parse_line;

    fn decode_str(line: &str) -> SourceResult<ChatMessage> {
        decode(parse_line(line).unwrap())
    }

    #[test]
    fn privmsg_resolves_sender_and_channel() {
        let msg =
            decode_str("@display-name=D :demo!demo@demo.tmi.twitch.tv PRIVMSG #channel :hello world")
                .unwrap();
        assert_eq!(msg.sender, "demo");
        assert_eq!(msg.channel, "channel");
        assert_eq!(msg.trailer, "hello world");
        assert_eq!(msg.tag("display-name"), Some("D"));
        assert!(msg.is_privmsg());
    }

    #[test]
    fn privmsg_without_user_prefix_is_rejected() {
        let err = decode_str(":tmi.twitch.tv PRIVMSG #channel :hi").unwrap_err();
        assert!(matches!(err, SourceError::Decode { ref command, .. } if command == "PRIVMSG"));

        let err = decode_str(":a!a@a PRIVMSG # :hi").unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));

        let err = decode_str(":a!a@a PRIVMSG #channel").unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[test]
    fn join_requires_channel() {
        assert!(decode_str(":a!a@a.tmi.twitch.tv JOIN #chan").is_ok());
        assert!(matches!(
            decode_str(":a!a@a.tmi.twitch.tv JOIN"),
            Err(SourceError::Decode { .. })
        ));
    }

    #[test]
    fn notice_and_system_lines() {
        let msg = decode_str(":tmi.twitch.tv NOTICE #chan :Login authentication failed").unwrap();
        assert_eq!(msg.channel, "chan");
        assert_eq!(msg.sender, SYSTEM_SENDER);
        assert_eq!(msg.trailer, "Login authentication failed");

        let msg = decode_str(":tmi.twitch.tv NOTICE * :hi").unwrap();
        assert_eq!(msg.channel, "");

        let msg = decode_str(":tmi.twitch.tv 001 demo :Welcome, GLHF!").unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.args, vec!["demo", "Welcome, GLHF!"]);
        assert_eq!(msg.trailer, "Welcome, GLHF!");
        assert!(msg.prefix == "tmi.twitch.tv");
    }
}
