//! Maps free-form job names onto the signing service's job identifiers.

pub const SIGNUP_CONFIRMATION_EMAIL: &str = "send.signup.confirmation.email";
pub const SIGNUP_EMAIL: &str = "send.signup.email";
pub const SIGNING_EMAIL: &str = "send.signing.email";
pub const DOCUMENT_SIGNED: &str = "document.signed";
pub const DOCUMENT_COMPLETED: &str = "document.completed";
pub const RECIPIENT_SIGNED_EMAIL: &str = "send.recipient.signed.email";
pub const DOCUMENT_COMPLETED_EMAIL: &str = "send.document.completed.email";

pub const CANONICAL_IDS: [&str; 7] = [
    SIGNUP_CONFIRMATION_EMAIL,
    SIGNUP_EMAIL,
    SIGNING_EMAIL,
    DOCUMENT_SIGNED,
    DOCUMENT_COMPLETED,
    RECIPIENT_SIGNED_EMAIL,
    DOCUMENT_COMPLETED_EMAIL,
];

// Ordered most specific first: the substring pass takes the first hit.
const KNOWN_NAMES: &[(&str, &str)] = &[
    (SIGNUP_CONFIRMATION_EMAIL, SIGNUP_CONFIRMATION_EMAIL),
    (DOCUMENT_COMPLETED_EMAIL, DOCUMENT_COMPLETED_EMAIL),
    (RECIPIENT_SIGNED_EMAIL, RECIPIENT_SIGNED_EMAIL),
    (SIGNUP_EMAIL, SIGNUP_EMAIL),
    (SIGNING_EMAIL, SIGNING_EMAIL),
    ("Send Confirmation Email", SIGNUP_CONFIRMATION_EMAIL),
    ("signup.confirmation", SIGNUP_CONFIRMATION_EMAIL),
    ("confirmation.email", SIGNUP_CONFIRMATION_EMAIL),
    (DOCUMENT_SIGNED, DOCUMENT_SIGNED),
    (DOCUMENT_COMPLETED, DOCUMENT_COMPLETED),
];

/// Tokens that route a job to the backend even when its canonical ID is not
/// one of the forwarded kinds.
const FORWARD_TOKENS: &[&str] = &[
    DOCUMENT_SIGNED,
    DOCUMENT_COMPLETED,
    RECIPIENT_SIGNED_EMAIL,
    SIGNUP_CONFIRMATION_EMAIL,
    SIGNING_EMAIL,
    "send.email",
    "confirmation email",
];

pub fn canonicalize(name: &str) -> String {
    if let Some((_, id)) = KNOWN_NAMES.iter().find(|(known, _)| *known == name) {
        return (*id).to_string();
    }

    let lower = name.to_lowercase();
    if let Some((_, id)) = KNOWN_NAMES
        .iter()
        .find(|(known, _)| lower.contains(&known.to_lowercase()))
    {
        return (*id).to_string();
    }

    if lower.contains("confirmation") || lower.contains("verify") {
        SIGNUP_CONFIRMATION_EMAIL.to_string()
    } else if lower.contains("sign") {
        SIGNING_EMAIL.to_string()
    } else if lower.contains("complet") {
        DOCUMENT_COMPLETED.to_string()
    } else {
        lower.replace(' ', ".")
    }
}

/// Whether a job is relayed to the backend. Everything else is skipped and
/// counted as done.
pub fn is_forwarded(raw_name: &str, canonical: &str) -> bool {
    if canonical.contains("webhook") || raw_name.to_lowercase().contains("webhook") {
        return true;
    }

    if FORWARD_TOKENS.contains(&canonical) {
        return true;
    }

    let lower = raw_name.to_lowercase();
    FORWARD_TOKENS.iter().any(|token| lower.contains(token))
}

/// The enrichment path a canonical job ID takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    SignupConfirmation,
    Signing,
    DocumentCompleted,
    Other,
}

impl JobKind {
    pub fn of(canonical: &str) -> Self {
        match canonical {
            SIGNUP_CONFIRMATION_EMAIL => JobKind::SignupConfirmation,
            SIGNING_EMAIL | DOCUMENT_SIGNED => JobKind::Signing,
            DOCUMENT_COMPLETED => JobKind::DocumentCompleted,
            _ => JobKind::Other,
        }
    }
}
