//! Plain-text rendering of view state.

use crate::domain::{Item, Ticket};
use crate::features::{ItemsState, SessionState, TicketsState};
use helpdesk_core::Change;
use std::fmt::Write;

fn ticket_line(ticket: &Ticket) -> String {
    format!(
        "{} {} <{}>, {} ({}) [{}]",
        ticket.order_number.as_deref().unwrap_or(ticket.id.as_str()),
        ticket.customer_name,
        ticket.customer_email,
        ticket.coating_color,
        ticket.coating_finish,
        ticket.status,
    )
}

/// Numbered ticket list, newest first
#[must_use]
pub fn tickets(state: &TicketsState) -> String {
    if state.tickets.is_empty() {
        return if state.loading {
            "Loading tickets...".to_string()
        } else {
            "No tickets yet".to_string()
        };
    }
    let mut out = String::new();
    for (n, ticket) in state.tickets.iter().enumerate() {
        let marker = if state.pending.contains(&ticket.id) { " ..." } else { "" };
        let _ = writeln!(out, "{:>3}. {}{marker}", n + 1, ticket_line(ticket));
    }
    out
}

/// One column per stage, in board order
#[must_use]
pub fn board(state: &TicketsState) -> String {
    let mut out = String::new();
    for (status, column) in state.board() {
        let _ = writeln!(out, "== {status} ({})", column.len());
        for ticket in column {
            let _ = writeln!(
                out,
                "   {} {}",
                ticket.order_number.as_deref().unwrap_or(ticket.id.as_str()),
                ticket.customer_name
            );
        }
    }
    out
}

/// Numbered item list; unsaved edits are starred
#[must_use]
pub fn items(state: &ItemsState) -> String {
    if state.items.is_empty() {
        return if state.loading {
            "Loading items...".to_string()
        } else {
            "No items yet".to_string()
        };
    }
    let mut out = String::new();
    for (n, item) in state.items.iter().enumerate() {
        let marker = if state.unsaved.contains(&item.id) { "*" } else { " " };
        let _ = writeln!(out, "{:>3}.{marker}{}", n + 1, item.value);
    }
    out
}

/// One line for a ticket feed event
#[must_use]
pub fn ticket_change(change: &Change<Ticket>) -> Option<String> {
    match change {
        Change::Inserted(ticket) => Some(format!("+ {}", ticket_line(ticket))),
        Change::Updated(ticket) => Some(format!("~ {}", ticket_line(ticket))),
        Change::Deleted(id) => Some(format!("- ticket {id}")),
        Change::Other { .. } => None,
    }
}

/// One line for an item feed event
#[must_use]
pub fn item_change(change: &Change<Item>) -> Option<String> {
    match change {
        Change::Inserted(item) => Some(format!("+ {}", item.value)),
        Change::Updated(item) => Some(format!("~ {}", item.value)),
        Change::Deleted(id) => Some(format!("- item {id}")),
        Change::Other { .. } => None,
    }
}

/// Who is signed in
#[must_use]
pub fn session(state: &SessionState) -> String {
    match &state.user {
        Some(user) => format!("Signed in as {}", user.email.as_deref().unwrap_or(&user.id)),
        None if state.checked => "Not signed in".to_string(),
        None => "Checking session...".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CoatingFinish, RecordId, TicketStatus};
    use chrono::Utc;

    fn ticket(number: &str, status: TicketStatus) -> Ticket {
        Ticket {
            id: RecordId::new(format!("id-{number}")),
            order_number: Some(number.to_string()),
            customer_name: "John".to_string(),
            customer_email: "john@x.com".to_string(),
            coating_color: "black".to_string(),
            coating_finish: CoatingFinish::LowerGloss,
            status,
            date_received: None,
            last_updated: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn ticket_list_is_numbered() {
        let state = TicketsState {
            tickets: vec![ticket("CK-0002", TicketStatus::InProgress)],
            ..TicketsState::default()
        };
        assert_eq!(
            tickets(&state),
            "  1. CK-0002 John <john@x.com>, black (lower_gloss) [In Progress]\n"
        );
    }

    #[test]
    fn board_lists_empty_stages() {
        let state = TicketsState {
            tickets: vec![ticket("CK-0001", TicketStatus::Completed)],
            ..TicketsState::default()
        };
        let text = board(&state);
        assert!(text.starts_with("== Order Received (0)\n"));
        assert!(text.ends_with("== Completed (1)\n   CK-0001 John\n"));
    }

    #[test]
    fn other_changes_are_silent() {
        let change: Change<Ticket> = Change::Other {
            kind: "TRUNCATE".to_string(),
        };
        assert_eq!(ticket_change(&change), None);
    }
}
