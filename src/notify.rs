//! Outbound notification channel.
//!
//! Snapshots and finished clips are delivered to a webhook endpoint as
//! multipart form posts. Delivery is strictly best-effort: every caller logs
//! and swallows errors, nothing on the capture or recording path depends on
//! the sink.

use std::path::Path;

use anyhow::{Context, Result};

/// Best-effort delivery seam.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, label: &str, file: Option<&Path>) -> Result<()>;
}

/// Posts `multipart/form-data` (a `content` field plus an optional `file`
/// part) to a Discord-style webhook URL.
pub struct WebhookNotifier {
    url: String,
    timeout: std::time::Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: std::time::Duration::from_secs(10),
        }
    }
}

impl NotificationSink for WebhookNotifier {
    fn deliver(&self, label: &str, file: Option<&Path>) -> Result<()> {
        let attachment = match file {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("read attachment {}", path.display()))?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "attachment".to_string());
                Some((name, bytes))
            }
            None => None,
        };

        let boundary = format!("sentry{:016x}", rand::random::<u64>());
        let body = multipart_body(&boundary, label, attachment.as_ref());

        let response = ureq::post(&self.url)
            .timeout(self.timeout)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)
            .context("post webhook notification")?;
        log::debug!(
            "webhook delivery '{}' accepted with status {}",
            label,
            response.status()
        );
        Ok(())
    }
}

fn multipart_body(boundary: &str, label: &str, file: Option<&(String, Vec<u8>)>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Disposition: form-data; name=\"content\"\r\n\r\n{label}\r\n")
            .as_bytes(),
    );
    if let Some((name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

/// Sink used when no webhook is configured.
pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn deliver(&self, label: &str, file: Option<&Path>) -> Result<()> {
        log::debug!(
            "notification '{}' dropped (no webhook configured, file={:?})",
            label,
            file
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_carries_label_and_file() {
        let file = ("clip.mp4".to_string(), vec![1u8, 2, 3]);
        let body = multipart_body("B", "Motion detected", Some(&file));
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("name=\"content\"\r\n\r\nMotion detected"));
        assert!(text.contains("filename=\"clip.mp4\""));
        assert!(text.ends_with("--B--\r\n"));
        assert!(body.windows(3).any(|w| w == [1, 2, 3]));
    }

    #[test]
    fn multipart_body_without_file_is_just_the_label() {
        let body = multipart_body("B", "hello", None);
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("hello"));
        assert!(!text.contains("filename"));
    }

    #[test]
    fn missing_attachment_is_an_error_not_a_panic() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/webhook");
        let missing = Path::new("/nonexistent/capture_0.jpg");
        assert!(notifier.deliver("Motion detected", Some(missing)).is_err());
    }
}
