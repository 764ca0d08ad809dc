use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Outbound email delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .context("smtp starttls relay")?
            .port(cfg.port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();
        Ok(Self {
            transport,
            from: cfg.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.parse().context("parse from address")?)
            .to(mail.to.parse().context("parse recipient address")?)
            .subject(mail.subject)
            .header(ContentType::TEXT_HTML)
            .body(mail.html)
            .context("build message")?;
        self.transport.send(message).await.context("smtp send")?;
        Ok(())
    }
}

/// Writes mail to the log instead of delivering it.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: OutgoingMail) -> anyhow::Result<()> {
        info!(to = %mail.to, subject = %mail.subject, body = %mail.html, "mail (log backend)");
        Ok(())
    }
}

pub mod templates {
    use super::OutgoingMail;

    pub fn verification(base_url: &str, to: &str, name: &str, token: &str, otp: &str) -> OutgoingMail {
        let link = format!("{base_url}/auth/verify-email?token={token}");
        OutgoingMail {
            to: to.to_string(),
            subject: "Email Verification - Complete Your Registration".into(),
            html: format!(
                r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2>Welcome! Please verify your email address</h2>
  <p>Hello {name},</p>
  <p>Thank you for registering. Follow the link below to verify your email address:</p>
  <p><a href="{link}">Verify Email Address</a></p>
  <p style="word-break: break-all; color: #666;">{link}</p>
  <p><strong>Your OTP code: {otp}</strong> (for future reference)</p>
  <p style="color: #666; font-size: 12px;">This verification link will expire in 10 minutes.</p>
</div>"#
            ),
        }
    }

    pub fn verification_resent(
        base_url: &str,
        to: &str,
        name: &str,
        token: &str,
        otp: &str,
    ) -> OutgoingMail {
        let link = format!("{base_url}/auth/verify-email?token={token}");
        OutgoingMail {
            to: to.to_string(),
            subject: "Email Verification - Resent".into(),
            html: format!(
                r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2>Email Verification</h2>
  <p>Hello {name},</p>
  <p>Here's your new verification link:</p>
  <p><a href="{link}">Verify Email Address</a></p>
  <p><strong>Your new OTP code: {otp}</strong></p>
  <p style="color: #666; font-size: 12px;">This verification link will expire in 10 minutes.</p>
</div>"#
            ),
        }
    }

    pub fn password_reset(base_url: &str, to: &str, name: &str, token: &str) -> OutgoingMail {
        let link = format!("{base_url}/auth/reset-password?token={token}");
        OutgoingMail {
            to: to.to_string(),
            subject: "Password Reset Request".into(),
            html: format!(
                r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2>Password Reset Request</h2>
  <p>Hello {name},</p>
  <p>You requested to reset your password. Follow the link below to proceed:</p>
  <p><a href="{link}">Reset Password</a></p>
  <p style="word-break: break-all; color: #666;">{link}</p>
  <p style="color: #666; font-size: 12px;">This reset link will expire in 10 minutes.</p>
</div>"#
            ),
        }
    }
}
