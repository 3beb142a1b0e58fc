//! Mail export of a node's stored log.
//!
//! The core never composes mail itself. It gathers the stored bytes and the
//! node's [`Mailer`] metadata into a [`MailDraft`] and hands it to a
//! [`MailComposer`] supplied by the host platform.

use serde::{Deserialize, Serialize};

/// Subject, body and recipients attached to a node for export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mailer {
    /// Mail subject.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Recipient addresses.
    pub recipients: Vec<String>,
}

impl Mailer {
    /// Creates a mailer descriptor.
    #[must_use]
    pub fn new(subject: impl Into<String>, body: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            recipients,
        }
    }
}

/// Everything a composer needs to present one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailDraft {
    /// Mail subject.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Recipient addresses.
    pub recipients: Vec<String>,
    /// Stored log bytes.
    pub attachment: Vec<u8>,
    /// Attachment file name.
    pub attachment_name: String,
    /// Attachment media type.
    pub media_type: String,
}

/// Platform capability that presents a mail draft to the user.
pub trait MailComposer {
    /// Opaque UI context the draft is presented from.
    type Presenter: ?Sized;

    /// Whether mail is configured on this platform.
    fn can_send_mail(&self) -> bool;

    /// Presents the draft.
    fn present(&self, presenter: &Self::Presenter, draft: MailDraft);
}

/// What an export attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The draft was handed to the composer.
    Presented,
    /// The composer reported mail is not available.
    MailUnavailable,
    /// No presentation context was supplied.
    NoPresenter,
    /// The node has no mailer descriptor.
    NoMailer,
    /// The stored log could not be read.
    Unreadable,
}
