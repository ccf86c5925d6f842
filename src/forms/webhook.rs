use serde::Deserialize;
use serde_valid::Validate;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WebhookForm {
    pub project_id: Uuid,
    #[validate(pattern = r"^https?://.+")]
    pub url: String,
    #[validate(min_length = 16)]
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayForm {
    /// Rewind target; deliveries resume after this event.
    pub from_build_id: Option<Uuid>,
    #[serde(default)]
    pub from_event_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_and_secret_are_validated() {
        let ok: WebhookForm = serde_json::from_str(
            r#"{"project_id":"0192f0c1-0000-7000-8000-000000000000",
                "url":"https://hooks.example/sheen",
                "secret":"0123456789abcdef"}"#,
        )
        .unwrap();
        assert!(ok.validate().is_ok());

        let bad_url = WebhookForm {
            url: "ftp://hooks.example".to_string(),
            ..ok.clone()
        };
        assert!(bad_url.validate().is_err());

        let short_secret = WebhookForm {
            secret: "short".to_string(),
            ..ok
        };
        assert!(short_secret.validate().is_err());
    }
}
