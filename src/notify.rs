//! Transactional email, fire-and-forget from the catalog's point of view.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use lettre::message::{header::ContentType, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpSettings;
use crate::models::{Classification, Course};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, msg: EmailMessage) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpSettings) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)?.port(cfg.port);
        if let (Some(user), Some(pass)) = (&cfg.user, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            from: cfg.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, msg: EmailMessage) -> Result<()> {
        let email = Message::builder()
            .from(self.from.parse()?)
            .to(msg.to.parse()?)
            .subject(msg.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(msg.text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(msg.html_body),
                    ),
            )?;
        self.transport.send(email).await?;
        Ok(())
    }
}

/// Used when SMTP is not configured: records the intent in the logs only.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, msg: EmailMessage) -> Result<()> {
        tracing::info!(to = %msg.to, subject = %msg.subject, "email (smtp disabled)");
        Ok(())
    }
}

/// Spawns deliveries so a slow or failing mail server never holds up a request.
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(LogMailer))
    }

    pub fn dispatch(&self, msg: EmailMessage) -> tokio::task::JoinHandle<()> {
        let mailer = self.mailer.clone();
        tokio::spawn(async move {
            let to = msg.to.clone();
            if let Err(e) = mailer.send(msg).await {
                tracing::warn!(error = %e, to = %to, "email delivery failed");
            }
        })
    }

    pub fn course_created(&self, to: &str, course: &Course) {
        self.dispatch(EmailMessage {
            to: to.to_string(),
            subject: format!("Cours créé : {}", course.title),
            text_body: format!(
                "Votre cours \"{}\" a été créé. Il reste en brouillon tant qu'il n'est pas publié.",
                course.title
            ),
            html_body: format!(
                "<p>Votre cours <strong>{}</strong> a été créé.</p>\
                 <p>Il reste en brouillon tant qu'il n'est pas publié.</p>",
                html_escape(&course.title)
            ),
        });
    }

    pub fn course_published(&self, to: &str, course: &Course) {
        self.dispatch(EmailMessage {
            to: to.to_string(),
            subject: format!("Cours publié : {}", course.title),
            text_body: format!("Votre cours \"{}\" est maintenant visible dans le catalogue.", course.title),
            html_body: format!(
                "<p>Votre cours <strong>{}</strong> est maintenant visible dans le catalogue.</p>",
                html_escape(&course.title)
            ),
        });
    }

    pub fn quiz_result(&self, to: &str, course: &Course, score: u32, total: u32, class: Classification) {
        if !class.certificate_eligible() {
            return;
        }
        self.dispatch(EmailMessage {
            to: to.to_string(),
            subject: format!("Certificat disponible : {}", course.title),
            text_body: format!(
                "Félicitations ! Vous avez obtenu {score}/{total} au quiz final de \"{}\" \
                 et pouvez obtenir votre certificat.",
                course.title
            ),
            html_body: format!(
                "<h2>Félicitations !</h2><p>Vous avez obtenu <strong>{score}/{total}</strong> \
                 au quiz final de <strong>{}</strong>.</p><p>Votre certificat est disponible.</p>",
                html_escape(&course.title)
            ),
        });
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn msg() -> EmailMessage {
        EmailMessage {
            to: "learner@example.com".into(),
            subject: "hello".into(),
            text_body: "hi".into(),
            html_body: "<p>hi</p>".into(),
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_through_mailer() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(mailer.clone());
        notifier.dispatch(msg()).await.unwrap();
        assert_eq!(mailer.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let notifier = Notifier::new(Arc::new(FailingMailer));
        // the spawned task logs and completes instead of panicking
        assert!(notifier.dispatch(msg()).await.is_ok());
    }

    #[tokio::test]
    async fn certificate_mail_escapes_course_title() {
        use crate::models::Level;
        use chrono::Utc;
        use uuid::Uuid;

        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(mailer.clone());
        let course = Course {
            id: Uuid::new_v4(),
            title: "<script>alert(1)</script> & co".into(),
            description: "d".into(),
            long_description: String::new(),
            level: Level::Beginner,
            price: 0.0,
            duration_label: String::new(),
            image_url: None,
            category_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            is_published: true,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        notifier.quiz_result("learner@example.com", &course, 60, 60, Classification::Excellent);
        for _ in 0..50 {
            if !mailer.sent.lock().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].html_body.contains("<script>"));
        assert!(sent[0].html_body.contains("&lt;script&gt;alert(1)&lt;/script&gt; &amp; co"));
    }
}
