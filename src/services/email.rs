use lettre::{
    Message, SmtpTransport, Transport,
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
};
use log::{info, error, warn};

use crate::config::Config;

pub struct EmailService;

impl EmailService {
    pub async fn send_verification_email(email: &str, name: &str, token: &str) -> bool {
        match Self::try_send_verification(email, name, token).await {
            Ok(_) => {
                info!("Verification email sent to {}", email);
                true
            }
            Err(e) => {
                error!("Failed to send verification email to {}: {}", email, e);
                false
            }
        }
    }

    async fn try_send_verification(email: &str, name: &str, token: &str) -> Result<(), Box<dyn std::error::Error>> {
        let display_name = if name.is_empty() { "there" } else { name };
        let link = format!("{}/verify-email?token={}", Config::app_base_url(), token);

        let email_body = format!(
            r#"
            <!DOCTYPE html>
            <html>
            <head>
                <style>
                    body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
                    .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
                    .header {{ background: #1f6feb; color: white; padding: 30px; text-align: center; border-radius: 10px 10px 0 0; }}
                    .content {{ background: #f9f9f9; padding: 30px; border-radius: 0 0 10px 10px; }}
                    .button {{ display: inline-block; background: #1f6feb; color: white; padding: 12px 24px;
                              border-radius: 6px; text-decoration: none; }}
                </style>
            </head>
            <body>
                <div class="container">
                    <div class="header">
                        <h1>LeadCoin</h1>
                        <p>Confirm your email address</p>
                    </div>
                    <div class="content">
                        <p>Hi {},</p>
                        <p>Thanks for signing up. Confirm your address to start unlocking leads.</p>
                        <p style="text-align: center;"><a class="button" href="{}">Verify email</a></p>
                        <p>If the button does not work, paste this link into your browser:<br>{}</p>
                        <p>If you didn't create an account, you can ignore this email.</p>
                    </div>
                </div>
            </body>
            </html>
            "#,
            display_name, link, link
        );

        Self::deliver(email, "Verify your LeadCoin account", email_body)
    }

    pub async fn send_ticket_reply_email(email: &str, subject: &str, reply: &str) -> bool {
        match Self::try_send_ticket_reply(email, subject, reply).await {
            Ok(_) => {
                info!("Ticket reply notification sent to {}", email);
                true
            }
            Err(e) => {
                error!("Failed to send ticket reply notification: {}", e);
                false
            }
        }
    }

    async fn try_send_ticket_reply(email: &str, subject: &str, reply: &str) -> Result<(), Box<dyn std::error::Error>> {
        let email_body = format!(
            r#"
            <!DOCTYPE html>
            <html>
            <body>
                <h2>New reply on your support ticket</h2>
                <p><strong>{}</strong></p>
                <blockquote>{}</blockquote>
                <p>Sign in to LeadCoin to continue the conversation.</p>
                <p>Best regards,<br><strong>LeadCoin Support</strong></p>
            </body>
            </html>
            "#,
            subject, reply
        );

        Self::deliver(email, &format!("Re: {}", subject), email_body)
    }

    fn deliver(to: &str, subject: &str, body: String) -> Result<(), Box<dyn std::error::Error>> {
        let mail_user = Config::mail_user();
        let mail_password = Config::mail_password();

        if mail_user.is_empty() || mail_password.is_empty() {
            warn!("Email credentials not configured. Skipping email send.");
            return Err("Email not configured".into());
        }

        let from_mailbox: Mailbox = Config::mail_from().parse()?;
        let to_mailbox: Mailbox = to.parse()?;

        let email_message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body)?;

        let creds = Credentials::new(mail_user, mail_password);
        let mailer = SmtpTransport::starttls_relay(&Config::mail_host())?
            .port(Config::mail_port())
            .credentials(creds)
            .build();

        mailer.send(&email_message)?;
        Ok(())
    }
}
