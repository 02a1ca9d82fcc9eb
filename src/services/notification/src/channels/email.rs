//! Email notification channel implementation using SMTP

use crate::channels::{EmailDelivery, EmailRequest};
use crate::config::EmailConfig;
use crate::error::{NotificationError, Result};
use crate::metrics::NotificationMetrics;
use crate::templates::{RenderedEmail, TemplateRenderer};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
        PoolConfig,
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Email channel rendering templates and sending them over `T`
pub struct EmailChannel<T = AsyncSmtpTransport<Tokio1Executor>> {
    transport: T,
    renderer: Arc<TemplateRenderer>,
    from_mailbox: Mailbox,
    metrics: NotificationMetrics,
}

impl EmailChannel {
    /// Create an SMTP-backed email channel
    pub fn new(
        config: &EmailConfig,
        renderer: Arc<TemplateRenderer>,
        metrics: NotificationMetrics,
    ) -> Result<Self> {
        info!("Initializing email channel");

        let from_mailbox = sender_mailbox(config)?;

        // Build SMTP transport
        let mut transport_builder = if config.smtp_use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host).map_err(|e| {
                NotificationError::config(format!("Failed to create SMTP relay: {}", e))
            })?
        } else if config.smtp_use_starttls {
            let parameters = TlsParameters::new(config.smtp_host.clone()).map_err(|e| {
                NotificationError::config(format!("Invalid SMTP TLS parameters: {}", e))
            })?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
                .tls(Tls::Opportunistic(parameters))
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        transport_builder = transport_builder.port(config.smtp_port);

        // Add credentials if provided
        if !config.smtp_username.is_empty() && !config.smtp_password.is_empty() {
            let creds =
                Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
            transport_builder = transport_builder.credentials(creds);
        }

        let transport = transport_builder
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(config.timeout_seconds)))
            .build();

        info!(
            host = %config.smtp_host,
            port = config.smtp_port,
            "Email channel initialized successfully"
        );

        Ok(Self::with_transport(
            transport,
            from_mailbox,
            renderer,
            metrics,
        ))
    }
}

impl<T> EmailChannel<T> {
    /// Create an email channel over an already built transport
    pub fn with_transport(
        transport: T,
        from_mailbox: Mailbox,
        renderer: Arc<TemplateRenderer>,
        metrics: NotificationMetrics,
    ) -> Self {
        Self {
            transport,
            renderer,
            from_mailbox,
            metrics,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn build_message(&self, to: &str, rendered: RenderedEmail) -> Result<Message> {
        let to_mailbox = to
            .parse::<Mailbox>()
            .map_err(|e| NotificationError::email(format!("Invalid recipient email: {}", e)))?;

        let message = Message::builder()
            .from(self.from_mailbox.clone())
            .to(to_mailbox)
            .subject(rendered.subject)
            .header(ContentType::TEXT_HTML)
            .body(rendered.html)?;

        Ok(message)
    }
}

/// `"<from_name>" <from_email>`
pub fn sender_mailbox(config: &EmailConfig) -> Result<Mailbox> {
    let address = config
        .from_email
        .parse()
        .map_err(|e| NotificationError::config(format!("Invalid from email address: {}", e)))?;

    Ok(Mailbox::new(Some(config.from_name.clone()), address))
}

#[async_trait]
impl<T> EmailDelivery for EmailChannel<T>
where
    T: AsyncTransport + Send + Sync,
    T::Error: std::fmt::Display,
{
    async fn send_email(&self, request: EmailRequest) -> Result<()> {
        let template = request.template;
        let rendered = self.renderer.render(template, &request.data)?;
        let message = self.build_message(&request.to, rendered)?;

        match self.transport.send(message).await {
            Ok(_) => {
                self.metrics.record_email(template.id(), true);
                debug!(to = %request.to, template = %template, "Email sent");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_email(template.id(), false);
                error!(to = %request.to, template = %template, error = %e, "Failed to send email");
                Err(NotificationError::email(format!(
                    "Failed to send {} email to {}: {}",
                    template, request.to, e
                )))
            }
        }
    }
}

/// Email delivery used when the channel is switched off
pub struct DisabledEmail;

#[async_trait]
impl EmailDelivery for DisabledEmail {
    async fn send_email(&self, request: EmailRequest) -> Result<()> {
        debug!(to = %request.to, template = %request.template, "Email disabled, dropping message");
        Ok(())
    }
}
