//! Terminal command line grammar.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// `@<user> <text>`
    Send { to: String, text: String },
    /// `/read <message id>`
    Read(String),
    Unread,
    /// `/history <user>`
    History(String),
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Usage(&'static str),
    Unknown(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "nothing to do"),
            Self::Usage(usage) => write!(f, "usage: {usage}"),
            Self::Unknown(command) => write!(f, "unknown command {command}"),
        }
    }
}

pub fn parse(line: &str) -> Result<Input, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(rest) = line.strip_prefix('@') {
        return match rest.split_once(char::is_whitespace) {
            Some((to, text)) if !to.is_empty() && !text.trim().is_empty() => Ok(Input::Send {
                to: to.to_string(),
                text: text.trim().to_string(),
            }),
            _ => Err(ParseError::Usage("@<user> <text>")),
        };
    }

    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };
    match command {
        "/read" if !argument.is_empty() => Ok(Input::Read(argument.to_string())),
        "/read" => Err(ParseError::Usage("/read <message id>")),
        "/unread" => Ok(Input::Unread),
        "/history" if !argument.is_empty() => Ok(Input::History(argument.to_string())),
        "/history" => Err(ParseError::Usage("/history <user>")),
        "/quit" | "/exit" => Ok(Input::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}
