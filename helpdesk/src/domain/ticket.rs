//! Coating tickets and their kanban workflow.

use super::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Workflow stage of a ticket, in board order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Initial stage, assigned by the backend on insert
    #[default]
    #[serde(rename = "Order Received")]
    OrderReceived,
    /// Being coated
    #[serde(rename = "In Progress")]
    InProgress,
    /// Quality check
    #[serde(rename = "Final Inspection")]
    FinalInspection,
    /// Final stage
    #[serde(rename = "Completed")]
    Completed,
}

impl TicketStatus {
    /// Every stage in board order
    pub const ALL: [Self; 4] = [
        Self::OrderReceived,
        Self::InProgress,
        Self::FinalInspection,
        Self::Completed,
    ];

    /// The stage after this one, `None` for the final stage
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::OrderReceived => Some(Self::InProgress),
            Self::InProgress => Some(Self::FinalInspection),
            Self::FinalInspection => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Label as stored in the table
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderReceived => "Order Received",
            Self::InProgress => "In Progress",
            Self::FinalInspection => "Final Inspection",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    /// Accepts the stored label in any case, with `-` or `_` for spaces
    /// (`in-progress`, `FINAL_INSPECTION`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace(['-', '_'], " ");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| format!("Unknown status: {s}"))
    }
}

/// Surface finish of the coating.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoatingFinish {
    /// Glossier than recommended
    HigherGloss,
    /// Manufacturer recommendation; the table default
    #[default]
    RecommendedGloss,
    /// Flatter than recommended
    LowerGloss,
}

impl CoatingFinish {
    /// Every finish
    pub const ALL: [Self; 3] = [Self::HigherGloss, Self::RecommendedGloss, Self::LowerGloss];

    /// Value as stored in the table
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HigherGloss => "higher_gloss",
            Self::RecommendedGloss => "recommended_gloss",
            Self::LowerGloss => "lower_gloss",
        }
    }
}

impl fmt::Display for CoatingFinish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoatingFinish {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|finish| finish.as_str() == s)
            .ok_or_else(|| format!("Unknown coating finish: {s}"))
    }
}

/// A ticket as stored in the `tickets` table.
///
/// `order_number`, `status` and the timestamps are filled in by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Backend-assigned identifier
    pub id: RecordId,
    /// Human-facing order number, formatted by the backend
    #[serde(default)]
    pub order_number: Option<String>,
    /// Customer name
    pub customer_name: String,
    /// Customer email
    pub customer_email: String,
    /// Coating color
    pub coating_color: String,
    /// Coating finish
    #[serde(default)]
    pub coating_finish: CoatingFinish,
    /// Workflow stage
    pub status: TicketStatus,
    /// Intake date as reported by the backend
    #[serde(default)]
    pub date_received: Option<String>,
    /// Last modification
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Raw ticket form input. Every field may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TicketDraft {
    /// Customer name
    pub customer_name: Option<String>,
    /// Customer email
    pub customer_email: Option<String>,
    /// Coating color
    pub coating_color: Option<String>,
    /// Coating finish, unchecked
    pub coating_finish: Option<String>,
}

impl TicketDraft {
    /// A draft with the three required fields set
    #[must_use]
    pub fn new(
        customer_name: impl Into<String>,
        customer_email: impl Into<String>,
        coating_color: impl Into<String>,
    ) -> Self {
        Self {
            customer_name: Some(customer_name.into()),
            customer_email: Some(customer_email.into()),
            coating_color: Some(coating_color.into()),
            coating_finish: None,
        }
    }

    /// Set the finish
    #[must_use]
    pub fn with_finish(mut self, finish: impl Into<String>) -> Self {
        self.coating_finish = Some(finish.into());
        self
    }
}

/// Insert payload for a validated ticket.
///
/// A missing finish is left out so the table default applies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewTicket {
    /// Customer name
    pub customer_name: String,
    /// Customer email
    pub customer_email: String,
    /// Coating color
    pub coating_color: String,
    /// Coating finish
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coating_finish: Option<CoatingFinish>,
}

/// Partial update. Missing fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TicketPatch {
    /// New customer name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    /// New customer email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    /// New coating color
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coating_color: Option<String>,
    /// New coating finish
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coating_finish: Option<CoatingFinish>,
    /// New stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
}

impl TicketPatch {
    /// Move to `status`
    #[must_use]
    pub fn status(status: TicketStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply to a ticket in place
    pub fn apply_to(&self, ticket: &mut Ticket) {
        if let Some(name) = &self.customer_name {
            ticket.customer_name.clone_from(name);
        }
        if let Some(email) = &self.customer_email {
            ticket.customer_email.clone_from(email);
        }
        if let Some(color) = &self.coating_color {
            ticket.coating_color.clone_from(color);
        }
        if let Some(finish) = self.coating_finish {
            ticket.coating_finish = finish;
        }
        if let Some(status) = self.status {
            ticket.status = status;
        }
    }
}
