//! Ticket form validation.
//!
//! Every rule runs; the failures are collected in rule order rather than
//! stopping at the first one.

use super::ticket::{CoatingFinish, NewTicket, TicketDraft};
use crate::error::ValidationErrors;
use regex::Regex;
use std::sync::LazyLock;

/// Customer name missing or blank
pub const NAME_REQUIRED: &str = "Customer name is required";
/// Customer email missing or blank
pub const EMAIL_REQUIRED: &str = "Customer email is required";
/// Customer email is not of the form `local@domain.tld`
pub const EMAIL_INVALID: &str = "Valid email is required";
/// Coating color missing or blank
pub const COLOR_REQUIRED: &str = "Coating color is required";
/// Finish given but not one of the known finishes
pub const FINISH_INVALID: &str = "Invalid coating finish specified";

#[allow(clippy::expect_used)] // Constant pattern
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

fn blank(field: Option<&String>) -> bool {
    field.is_none_or(|value| value.trim().is_empty())
}

/// The finish as entered, with a blank entry counting as none
fn finish(draft: &TicketDraft) -> Option<&str> {
    draft
        .coating_finish
        .as_deref()
        .map(str::trim)
        .filter(|finish| !finish.is_empty())
}

/// Check a draft. An empty result means the draft is valid.
///
/// - name and color must be present and not blank
/// - email must be present and not blank, and separately must look like an
///   address; a missing email fails both checks
/// - finish may be absent or blank, but if given must be a known finish
#[must_use]
pub fn validate_ticket(draft: &TicketDraft) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    if blank(draft.customer_name.as_ref()) {
        errors.push(NAME_REQUIRED);
    }
    if blank(draft.customer_email.as_ref()) {
        errors.push(EMAIL_REQUIRED);
    }
    if !draft
        .customer_email
        .as_deref()
        .is_some_and(|email| EMAIL.is_match(email))
    {
        errors.push(EMAIL_INVALID);
    }
    if blank(draft.coating_color.as_ref()) {
        errors.push(COLOR_REQUIRED);
    }
    if finish(draft).is_some_and(|finish| finish.parse::<CoatingFinish>().is_err()) {
        errors.push(FINISH_INVALID);
    }

    errors
}

impl TicketDraft {
    /// Validate and turn into an insert payload with trimmed text.
    ///
    /// # Errors
    ///
    /// Returns every failed rule when the draft is invalid.
    pub fn validate(&self) -> Result<NewTicket, ValidationErrors> {
        let errors = validate_ticket(self);
        if !errors.is_empty() {
            return Err(errors);
        }

        let text = |field: &Option<String>| {
            field.as_deref().map(str::trim).unwrap_or_default().to_string()
        };
        Ok(NewTicket {
            customer_name: text(&self.customer_name),
            customer_email: text(&self.customer_email),
            coating_color: text(&self.coating_color),
            coating_finish: finish(self).and_then(|finish| finish.parse().ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn valid() -> TicketDraft {
        TicketDraft::new("John", "john@example.com", "black")
    }

    #[test]
    fn complete_draft_is_valid() {
        assert!(validate_ticket(&valid()).is_empty());
        assert!(validate_ticket(&valid().with_finish("lower_gloss")).is_empty());
    }

    #[test]
    fn empty_name_is_the_only_failure() {
        let draft = TicketDraft::new("", "a@b.com", "black");
        assert_eq!(validate_ticket(&draft).messages(), [NAME_REQUIRED]);
    }

    #[test]
    fn unknown_finish_is_rejected() {
        let draft = valid().with_finish("invalid_finish");
        let errors = validate_ticket(&draft);
        assert!(errors.contains(FINISH_INVALID));
        assert_eq!(errors.messages().len(), 1);
    }

    #[test]
    fn blank_finish_is_treated_as_absent() {
        for entry in ["", "   "] {
            let draft = valid().with_finish(entry);
            assert!(validate_ticket(&draft).is_empty(), "{entry:?}");
            assert_eq!(draft.validate().map(|t| t.coating_finish), Ok(None));
        }

        let padded = valid().with_finish(" higher_gloss ");
        assert_eq!(
            padded.validate().map(|t| t.coating_finish),
            Ok(Some(CoatingFinish::HigherGloss))
        );
    }

    #[test]
    fn empty_draft_reports_every_rule_in_order() {
        let errors = validate_ticket(&TicketDraft::default());
        assert_eq!(
            errors.messages(),
            [NAME_REQUIRED, EMAIL_REQUIRED, EMAIL_INVALID, COLOR_REQUIRED]
        );
    }

    #[test]
    fn malformed_emails_fail_the_format_check_only() {
        for email in ["john", "john@example", "@example.com", "jo hn@example.com"] {
            let draft = TicketDraft::new("John", email, "black");
            assert_eq!(validate_ticket(&draft).messages(), [EMAIL_INVALID], "{email}");
        }
    }

    #[test]
    fn validated_payload_is_trimmed_and_typed() {
        let draft =
            TicketDraft::new("  John ", "john@example.com", " black").with_finish("higher_gloss");
        let new = draft.validate();
        assert_eq!(
            new,
            Ok(NewTicket {
                customer_name: "John".to_string(),
                customer_email: "john@example.com".to_string(),
                coating_color: "black".to_string(),
                coating_finish: Some(CoatingFinish::HigherGloss),
            })
        );
        assert!(TicketDraft::default().validate().is_err());
    }

    proptest! {
        #[test]
        fn whitespace_only_fields_count_as_missing(pad in "[ \t\n]{0,8}") {
            let draft = TicketDraft::new(pad.clone(), "a@b.com", pad);
            let errors = validate_ticket(&draft);
            prop_assert!(errors.contains(NAME_REQUIRED));
            prop_assert!(errors.contains(COLOR_REQUIRED));
        }

        #[test]
        fn well_formed_addresses_pass(
            local in "[a-z0-9._+]{1,12}",
            domain in "[a-z0-9-]{1,12}",
            tld in "[a-z]{2,6}",
        ) {
            let draft = TicketDraft::new("John", format!("{local}@{domain}.{tld}"), "black");
            prop_assert!(validate_ticket(&draft).is_empty());
        }

        #[test]
        fn unknown_finishes_always_fail(finish in "[a-z_]{1,20}") {
            prop_assume!(finish.parse::<CoatingFinish>().is_err());
            let draft = valid().with_finish(finish);
            prop_assert!(validate_ticket(&draft).contains(FINISH_INVALID));
        }
    }
}
