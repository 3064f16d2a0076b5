//! Outbound mail.
//!
//! `SmtpMailer` sends through an SMTP relay. Port 465 uses implicit TLS, port
//! 25 talks plain SMTP to a local relay and any other port uses STARTTLS.

use async_trait::async_trait;

use crate::error::Result;

/// A message ready to be transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

/// Sends one message; a failure affects that message only.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

#[cfg(feature = "smtp")]
pub use smtp::SmtpMailer;

#[cfg(feature = "smtp")]
mod smtp {
    use async_trait::async_trait;
    use lettre::message::header::ContentType;
    use lettre::message::{Mailbox, MultiPart, SinglePart};
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

    use super::{MailMessage, MailTransport};
    use crate::error::{AppError, Result};
    use crate::models::SmtpConfig;

    /// SMTP mail transport.
    pub struct SmtpMailer {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
    }

    impl SmtpMailer {
        pub fn new(config: &SmtpConfig) -> Result<Self> {
            let from = format!("{} <{}>", config.from_name, config.from_email)
                .parse::<Mailbox>()
                .map_err(|e| AppError::config(format!("smtp.from_email: {e}")))?;

            let mut builder = match config.port {
                465 => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                    .map_err(|e| AppError::config(format!("smtp.host: {e}")))?
                    .port(465),
                25 => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                    .port(25),
                port => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|e| AppError::config(format!("smtp.host: {e}")))?
                    .port(port),
            };

            if let (Some(user), Some(pass)) = (&config.username, &config.password) {
                builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
            }

            Ok(Self {
                transport: builder.build(),
                from,
            })
        }

        fn build(&self, message: &MailMessage) -> Result<Message> {
            let recipient = message.recipients.join(", ");
            let mut builder = Message::builder()
                .from(self.from.clone())
                .subject(message.subject.clone());

            for address in &message.recipients {
                let mailbox = address
                    .parse::<Mailbox>()
                    .map_err(|e| AppError::transmission(address.clone(), e))?;
                builder = builder.to(mailbox);
            }

            let built = match (&message.text, &message.html) {
                (Some(text), Some(html)) => builder.multipart(MultiPart::alternative_plain_html(
                    text.clone(),
                    html.clone(),
                )),
                (None, Some(html)) => builder.singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.clone()),
                ),
                (text, None) => builder
                    .header(ContentType::TEXT_PLAIN)
                    .body(text.clone().unwrap_or_default()),
            };

            built.map_err(|e| AppError::transmission(recipient, e))
        }
    }

    #[async_trait]
    impl MailTransport for SmtpMailer {
        async fn send(&self, message: &MailMessage) -> Result<()> {
            let email = self.build(message)?;
            log::debug!(
                "Sending mail to {}: {}",
                message.recipients.join(", "),
                message.subject
            );
            self.transport
                .send(email)
                .await
                .map_err(|e| AppError::transmission(message.recipients.join(", "), e))?;
            Ok(())
        }
    }

    impl std::fmt::Debug for SmtpMailer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SmtpMailer")
                .field("from", &self.from.to_string())
                .finish()
        }
    }

}
