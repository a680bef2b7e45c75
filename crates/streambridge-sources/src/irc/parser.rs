//! Parser for IRCv3 lines with message tags.
//!
//! ```text
//! [@key=value;key=value ][:prefix ]COMMAND[ arg ...][ :trailer with spaces]
//! ```

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty message")]
    EmptyMessage,
    #[error("tags without message body")]
    MissingBody,
    #[error("prefix is not followed by a command")]
    MissingCommandSeparator,
    #[error("message does not contain a command")]
    NoCommand,
    #[error("argument delimiter without arguments")]
    DanglingArgDelimiter,
    #[error("tag without equals sign")]
    MalformedTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcCommand {
    pub name: String,
    pub args: Vec<String>,
}

impl IrcCommand {
    /// Numeric replies such as `001` or `376`.
    pub fn is_numeric(&self) -> bool {
        !self.name.is_empty() && self.name.bytes().all(|b| b.is_ascii_digit())
    }

    /// The last argument, which holds the trailer when there is one.
    pub fn trailer(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

/// One parsed line. Tags keep wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcLine {
    pub tags: Vec<Tag>,
    pub prefix: Option<String>,
    pub command: IrcCommand,
}

fn parse_tags(mut block: &str) -> Result<Vec<Tag>, ParseError> {
    let mut tags = Vec::new();
    while !block.is_empty() {
        let (key, rest) = block.split_once('=').ok_or(ParseError::MalformedTag)?;
        let (value, rest) = rest.split_once(';').unwrap_or((rest, ""));
        tags.push(Tag {
            key: key.to_string(),
            value: value.to_string(),
        });
        block = rest;
    }
    Ok(tags)
}

/// Parses a single line without its line terminator.
pub fn parse_line(line: &str) -> Result<IrcLine, ParseError> {
    if line.is_empty() {
        return Err(ParseError::EmptyMessage);
    }

    let mut rest = line;
    let mut tags = Vec::new();
    if let Some(tagged) = rest.strip_prefix('@') {
        let (block, body) = tagged.split_once(' ').ok_or(ParseError::MissingBody)?;
        tags = parse_tags(block)?;
        rest = body;
    }
    if rest.is_empty() {
        return Err(ParseError::MissingBody);
    }

    let mut prefix = None;
    if let Some(prefixed) = rest.strip_prefix(':') {
        let (source, body) = prefixed
            .split_once(' ')
            .ok_or(ParseError::MissingCommandSeparator)?;
        prefix = Some(source.to_string());
        rest = body;
    }

    if rest.is_empty() {
        return Err(ParseError::NoCommand);
    }
    let (name, mut rest) = match rest.split_once(' ') {
        Some((name, args)) => {
            if args.is_empty() {
                return Err(ParseError::DanglingArgDelimiter);
            }
            (name, args)
        }
        None => (rest, ""),
    };

    let mut args = Vec::new();
    while !rest.is_empty() {
        if let Some(trailer) = rest.strip_prefix(':') {
            args.push(trailer.to_string());
            break;
        }
        match rest.split_once(' ') {
            Some((arg, tail)) => {
                args.push(arg.to_string());
                rest = tail;
            }
            None => {
                args.push(rest.to_string());
                break;
            }
        }
    }

    Ok(IrcLine {
        tags,
        prefix,
        command: IrcCommand {
            name: name.to_string(),
            args,
        },
    })
}
