//! Line commands of the terminal shell.

use crate::domain::{RecordId, TicketDraft, TicketStatus};
use crate::features::{ItemsState, TicketsState};
use std::str::FromStr;
use thiserror::Error;

/// A command line could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// First word is not a command
    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),

    /// A required argument is missing
    #[error("Usage: {0}")]
    Usage(&'static str),

    /// `new` was given a field it does not know
    #[error("Unknown field: {0} (use name, email, color or finish)")]
    UnknownField(String),

    /// Not a stage name
    #[error("{0}")]
    Status(String),
}

/// Reference to a row as typed by the user: a 1-based list position, an id,
/// or for tickets an order number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRef(String);

impl RowRef {
    /// Wrap a reference
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    fn position(&self) -> Option<usize> {
        self.0.parse::<usize>().ok().and_then(|n| n.checked_sub(1))
    }

    /// The ticket this refers to
    #[must_use]
    pub fn ticket(&self, state: &TicketsState) -> Option<RecordId> {
        let by_key = state.tickets.iter().find(|ticket| {
            ticket.id.as_str() == self.0
                || ticket
                    .order_number
                    .as_deref()
                    .is_some_and(|number| number.eq_ignore_ascii_case(&self.0))
        });
        by_key
            .or_else(|| self.position().and_then(|n| state.tickets.get(n)))
            .map(|ticket| ticket.id.clone())
    }

    /// The item this refers to
    #[must_use]
    pub fn item(&self, state: &ItemsState) -> Option<RecordId> {
        self.position()
            .and_then(|n| state.items.get(n))
            .or_else(|| state.items.iter().find(|item| item.id.as_str() == self.0))
            .map(|item| item.id.clone())
    }
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Email a sign-in link
    Login {
        /// Address to sign in
        email: String,
    },
    /// Complete a link sign-in with its code
    Verify {
        /// Address the link went to
        email: String,
        /// Code from the email
        code: String,
    },
    /// Sign in with a password
    Password {
        /// Account email
        email: String,
        /// Account password
        password: String,
    },
    /// Create an account
    SignUp {
        /// Account email
        email: String,
        /// Account password
        password: String,
    },
    /// Sign out
    Logout,
    /// Show the signed-in user
    WhoAmI,
    /// List tickets
    Tickets,
    /// Show tickets by stage
    Board,
    /// Create a ticket; with no fields, submit the current form
    New(Vec<(FieldName, String)>),
    /// Advance a ticket one stage
    Next(RowRef),
    /// Put a ticket into a stage
    Move(RowRef, TicketStatus),
    /// Delete a ticket
    Delete(RowRef),
    /// List items
    Items,
    /// Add an item
    Add(String),
    /// Replace an item's text
    Edit(RowRef, String),
    /// Delete an item
    Remove(RowRef),
    /// Show usage
    Help,
    /// Leave the shell
    Quit,
}

/// A field of the `new` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldName {
    /// `name=`
    Name,
    /// `email=`
    Email,
    /// `color=`
    Color,
    /// `finish=`
    Finish,
}

impl FieldName {
    fn parse(key: &str) -> Result<Self, CommandError> {
        match key.to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "email" => Ok(Self::Email),
            "color" | "colour" => Ok(Self::Color),
            "finish" => Ok(Self::Finish),
            _ => Err(CommandError::UnknownField(key.to_string())),
        }
    }
}

/// Fill a draft from `new` fields
#[must_use]
pub fn draft_from(fields: &[(FieldName, String)]) -> TicketDraft {
    let mut draft = TicketDraft::default();
    for (field, value) in fields {
        let slot = match field {
            FieldName::Name => &mut draft.customer_name,
            FieldName::Email => &mut draft.customer_email,
            FieldName::Color => &mut draft.coating_color,
            FieldName::Finish => &mut draft.coating_finish,
        };
        *slot = Some(value.clone());
    }
    draft
}

/// Help text
pub const HELP: &str = "\
Session
  login <email>               email a sign-in link
  verify <email> <code>       sign in with the code from the link
  password <email> <pass>     sign in with a password
  signup <email> <pass>       create an account
  logout | whoami
Tickets
  tickets | board             list, or show by stage
  new name=.. email=.. color=.. [finish=..]
  next <ticket>               advance one stage
  move <ticket> <stage>       e.g. move CK-0001 final inspection
  delete <ticket>
Items
  items | add <text> | edit <item> <text> | rm <item>
  help | quit
A ticket is a list number, an id or an order number; an item is a list number or an id.";

/// `key=value` pairs; words without `=` continue the previous value
fn parse_fields(words: &[&str]) -> Result<Vec<(FieldName, String)>, CommandError> {
    let mut fields: Vec<(FieldName, String)> = Vec::new();
    for word in words {
        if let Some((key, value)) = word.split_once('=') {
            fields.push((FieldName::parse(key)?, value.to_string()));
        } else if let Some((_, value)) = fields.last_mut() {
            value.push(' ');
            value.push_str(word);
        } else {
            return Err(CommandError::Usage("new name=.. email=.. color=.. [finish=..]"));
        }
    }
    Ok(fields)
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((name, args)) = words.split_first() else {
            return Err(CommandError::Usage("help"));
        };
        let rest = args.join(" ");

        let command = match (name.to_ascii_lowercase().as_str(), args) {
            ("login", [email]) => Self::Login {
                email: (*email).to_string(),
            },
            ("login", _) => return Err(CommandError::Usage("login <email>")),
            ("verify", [email, code]) => Self::Verify {
                email: (*email).to_string(),
                code: (*code).to_string(),
            },
            ("verify", _) => return Err(CommandError::Usage("verify <email> <code>")),
            ("password", [email, password]) => Self::Password {
                email: (*email).to_string(),
                password: (*password).to_string(),
            },
            ("password", _) => return Err(CommandError::Usage("password <email> <password>")),
            ("signup", [email, password]) => Self::SignUp {
                email: (*email).to_string(),
                password: (*password).to_string(),
            },
            ("signup", _) => return Err(CommandError::Usage("signup <email> <password>")),
            ("logout", []) => Self::Logout,
            ("whoami", []) => Self::WhoAmI,
            ("tickets" | "ls", []) => Self::Tickets,
            ("board", []) => Self::Board,
            ("new", fields) => Self::New(parse_fields(fields)?),
            ("next", [ticket]) => Self::Next(RowRef::new(*ticket)),
            ("next", _) => return Err(CommandError::Usage("next <ticket>")),
            ("move", [ticket, stage @ ..]) if !stage.is_empty() => {
                let status = stage.join(" ").parse().map_err(CommandError::Status)?;
                Self::Move(RowRef::new(*ticket), status)
            },
            ("move", _) => return Err(CommandError::Usage("move <ticket> <stage>")),
            ("delete", [ticket]) => Self::Delete(RowRef::new(*ticket)),
            ("delete", _) => return Err(CommandError::Usage("delete <ticket>")),
            ("items", []) => Self::Items,
            ("add", [_, ..]) => Self::Add(rest),
            ("add", _) => return Err(CommandError::Usage("add <text>")),
            ("edit", [item, text @ ..]) if !text.is_empty() => {
                Self::Edit(RowRef::new(*item), text.join(" "))
            },
            ("edit", _) => return Err(CommandError::Usage("edit <item> <text>")),
            ("rm", [item]) => Self::Remove(RowRef::new(*item)),
            ("rm", _) => return Err(CommandError::Usage("rm <item>")),
            ("help" | "?", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            (other, _) => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}
