//! Email normalization: HTML stripping and content fingerprinting.

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{ScreenError, ScreenResult};
use crate::model::{EmailArtifact, EmailInput};

/// Strips HTML tags from a body, leaving plain text. Falls back to the raw
/// input if it doesn't parse as a fragment (plain-text bodies pass through
/// unchanged since `scraper` treats them as a single text node).
pub fn strip_html(body: &str) -> String {
    if !body.contains('<') {
        return body.to_string();
    }
    let fragment = scraper::Html::parse_fragment(body);
    let text: String = fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        body.to_string()
    } else {
        collapsed
    }
}

/// A stable content fingerprint computed once at ingest, binding training
/// labels to `(sender, subject, body)` rather than to any serialized
/// metadata that could drift between a scan and its later feedback.
pub fn fingerprint(sender: &str, subject: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sender.trim().to_lowercase().as_bytes());
    hasher.update(b"\0");
    hasher.update(subject.trim().to_lowercase().as_bytes());
    hasher.update(b"\0");
    hasher.update(body.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks the required-field shape of raw scan input without building an
/// artifact. Shared by the HTTP boundary (which maps a failure to 400 per
/// the adapter's "insufficient input" contract) and [`normalize`] itself
/// (whose own caller, the orchestrator, degrades to an unstored
/// `final_verdict=unknown` record instead, for callers that invoke the core
/// pipeline directly without an HTTP layer in front of it).
pub fn validate_required(input: &EmailInput) -> ScreenResult<()> {
    if input.sender.trim().is_empty() {
        return Err(ScreenError::InputError("sender is required".to_string()));
    }
    if input.subject.trim().is_empty() && input.body.trim().is_empty() {
        return Err(ScreenError::InputError(
            "subject or body is required".to_string(),
        ));
    }
    Ok(())
}

/// Normalizes raw request input into the in-flight artifact used by every
/// stage. Returns [`ScreenError::InputError`] when a required field is
/// missing, per the orchestrator's "input_insufficient" contract.
pub fn normalize(input: EmailInput) -> ScreenResult<EmailArtifact> {
    validate_required(&input)?;

    let body = strip_html(&input.body);
    let fp = fingerprint(&input.sender, &input.subject, &body);

    Ok(EmailArtifact {
        sender: input.sender,
        subject: input.subject,
        body,
        date: input.date.unwrap_or_else(Utc::now),
        fingerprint: fp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_removes_tags_and_collapses_whitespace() {
        let stripped = strip_html("<p>Hello   <b>world</b></p>");
        assert_eq!(stripped, "Hello world");
    }

    #[test]
    fn plain_text_passes_through_unchanged() {
        assert_eq!(strip_html("just text"), "just text");
    }

    #[test]
    fn fingerprint_is_stable_across_case_and_whitespace() {
        let a = fingerprint("Foo@Bar.com", " Hi ", "body text");
        let b = fingerprint("foo@bar.com", "Hi", "body text");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_body_change() {
        let a = fingerprint("a@b.com", "hi", "one");
        let b = fingerprint("a@b.com", "hi", "two");
        assert_ne!(a, b);
    }

    #[test]
    fn missing_sender_is_rejected() {
        let input = EmailInput {
            sender: "".to_string(),
            subject: "hi".to_string(),
            body: "body".to_string(),
            date: None,
        };
        assert!(normalize(input).is_err());
    }
}
