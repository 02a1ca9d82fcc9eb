//! Email templates
//!
//! The template set is closed: every template is a variant of
//! [`EmailTemplate`] and is compiled into the [`TemplateRenderer`] when the
//! service starts, so a broken template fails startup instead of a send.

use crate::error::{NotificationError, Result};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Transactional email templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmailTemplate {
    Welcome,
    EmailVerified,
}

impl EmailTemplate {
    pub const ALL: [EmailTemplate; 2] = [EmailTemplate::Welcome, EmailTemplate::EmailVerified];

    /// Stable identifier, also used as a metrics label
    pub fn id(&self) -> &'static str {
        match self {
            EmailTemplate::Welcome => "welcome",
            EmailTemplate::EmailVerified => "email-verified",
        }
    }

    // Subjects are plain text. Any placeholder in one needs triple braces.
    fn subject_source(&self) -> &'static str {
        match self {
            EmailTemplate::Welcome => "Welcome to News Website!",
            EmailTemplate::EmailVerified => "Email Verified Successfully",
        }
    }

    fn html_source(&self) -> &'static str {
        match self {
            EmailTemplate::Welcome => {
                r#"<h2>Welcome {{name}}!</h2>
<p>Thank you for joining our news community. Stay updated with the latest news and stories.</p>
<p>Your account: {{email}}</p>
<p>Start exploring news from trusted reporters and stay informed!</p>"#
            }
            EmailTemplate::EmailVerified => {
                r#"<h2>Email Verified!</h2>
<p>Hi {{name}},</p>
<p>Your email has been successfully verified. You can now access all features of our platform.</p>
<p>Happy reading!</p>"#
            }
        }
    }

    fn subject_name(&self) -> String {
        format!("{}.subject", self.id())
    }

    fn html_name(&self) -> String {
        format!("{}.html", self.id())
    }
}

impl fmt::Display for EmailTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for EmailTemplate {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self> {
        EmailTemplate::ALL
            .into_iter()
            .find(|template| template.id() == s)
            .ok_or_else(|| NotificationError::template(format!("Unknown email template: {}", s)))
    }
}

/// A rendered email, ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Compiled templates
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
}

impl TemplateRenderer {
    /// Compile every template
    pub fn new() -> Result<Self> {
        info!("Compiling email templates");

        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);

        for template in EmailTemplate::ALL {
            handlebars.register_template_string(&template.subject_name(), template.subject_source())?;
            handlebars.register_template_string(&template.html_name(), template.html_source())?;
        }

        Ok(Self { handlebars })
    }

    /// Render subject and body of `template` with `data`
    pub fn render(&self, template: EmailTemplate, data: &Value) -> Result<RenderedEmail> {
        let subject = self.handlebars.render(&template.subject_name(), data)?;
        let html = self.handlebars.render(&template.html_name(), data)?;

        Ok(RenderedEmail {
            subject: subject.trim().to_string(),
            html,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_template_ids_round_trip() {
        for template in EmailTemplate::ALL {
            assert_eq!(template.id().parse::<EmailTemplate>().unwrap(), template);
        }
    }

    #[test]
    fn test_unknown_template_fails_loudly() {
        let err = "password-reset".parse::<EmailTemplate>().unwrap_err();
        assert!(matches!(err, NotificationError::Template { .. }));
        assert!(err.to_string().contains("password-reset"));
        assert!("article-published".parse::<EmailTemplate>().is_err());
    }

    #[test]
    fn test_template_serde_uses_kebab_case() {
        assert_eq!(
            serde_json::to_value(EmailTemplate::EmailVerified).unwrap(),
            json!("email-verified")
        );
    }

    #[test]
    fn test_render_welcome() {
        let renderer = TemplateRenderer::new().unwrap();
        let rendered = renderer
            .render(
                EmailTemplate::Welcome,
                &json!({ "name": "A", "email": "x@y.com" }),
            )
            .unwrap();

        assert_eq!(rendered.subject, "Welcome to News Website!");
        assert!(rendered.html.contains("<h2>Welcome A!</h2>"));
        assert!(rendered.html.contains("Your account: x@y.com"));
    }

    #[test]
    fn test_render_escapes_html_in_data() {
        let renderer = TemplateRenderer::new().unwrap();
        let rendered = renderer
            .render(EmailTemplate::EmailVerified, &json!({ "name": "<b>Q&A</b>" }))
            .unwrap();

        assert_eq!(rendered.subject, "Email Verified Successfully");
        assert!(rendered.html.contains("<p>Hi &lt;b&gt;Q&amp;A&lt;/b&gt;,</p>"));
    }

    #[test]
    fn test_missing_fields_render_empty() {
        let renderer = TemplateRenderer::new().unwrap();
        let rendered = renderer
            .render(EmailTemplate::EmailVerified, &json!({}))
            .unwrap();
        assert!(rendered.html.contains("<p>Hi ,</p>"));
    }
}
