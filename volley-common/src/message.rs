//! Rendered message payloads and per-recipient personalization
//!
//! Rendering proper (templating, segmentation) happens in an external
//! collaborator; what arrives here is an already-rendered subject/body
//! pair plus a per-recipient substitution map. The dispatcher applies
//! the substitutions and injects the tracking and unsubscribe headers
//! immediately before handing the envelope to the transport.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    address::EmailAddress,
    ids::{CampaignId, RecipientId},
};

/// Per-recipient substitution values, keyed by token name
pub type Substitutions = AHashMap<String, String>;

/// A rendered message as received from the templating collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePayload {
    pub subject: String,
    pub body: String,

    /// Extra headers beyond the ones the dispatcher injects itself
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl MessagePayload {
    /// Apply `{{token}}` substitutions to the subject and body
    ///
    /// Unknown tokens are left in place so a missing substitution is
    /// visible in the delivered mail rather than silently blanked.
    #[must_use]
    pub fn personalize(&self, substitutions: &Substitutions) -> Self {
        Self {
            subject: substitute(&self.subject, substitutions),
            body: substitute(&self.body, substitutions),
            headers: self.headers.clone(),
        }
    }

    /// Inject the tracking and unsubscribe headers for one delivery
    ///
    /// The unsubscribe target is derived from the rotated sender so
    /// replies land at the relay's own domain.
    pub fn inject_delivery_headers(
        &mut self,
        campaign: CampaignId,
        recipient: RecipientId,
        sender: &EmailAddress,
    ) {
        self.headers
            .push(("X-Campaign-Id".to_string(), campaign.to_string()));
        self.headers
            .push(("X-Recipient-Id".to_string(), recipient.to_string()));
        self.headers.push((
            "List-Unsubscribe".to_string(),
            format!(
                "<mailto:unsubscribe@{}?subject=unsubscribe-{campaign}-{recipient}>",
                sender.domain()
            ),
        ));
    }
}

/// Replace `{{token}}` occurrences with values from the map
///
/// Token names are trimmed, so `{{ name }}` and `{{name}}` resolve the
/// same way.
#[must_use]
pub fn substitute(template: &str, substitutions: &Substitutions) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start + 2..].find("}}") else {
            break;
        };

        let token = rest[start + 2..start + 2 + end].trim();
        output.push_str(&rest[..start]);

        match substitutions.get(token) {
            Some(value) => output.push_str(value),
            None => output.push_str(&rest[start..start + 2 + end + 2]),
        }

        rest = &rest[start + 2 + end + 2..];
    }

    output.push_str(rest);
    output
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn subs(pairs: &[(&str, &str)]) -> Substitutions {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_basic() {
        let result = substitute("Hello {{name}}!", &subs(&[("name", "Ada")]));
        assert_eq!(result, "Hello Ada!");
    }

    #[test]
    fn test_substitute_trims_token_whitespace() {
        let result = substitute("Hi {{ name }}", &subs(&[("name", "Ada")]));
        assert_eq!(result, "Hi Ada");
    }

    #[test]
    fn test_substitute_leaves_unknown_tokens() {
        let result = substitute("Hi {{nickname}}", &subs(&[("name", "Ada")]));
        assert_eq!(result, "Hi {{nickname}}");
    }

    #[test]
    fn test_substitute_multiple_and_repeated() {
        let result = substitute(
            "{{a}} and {{b}} and {{a}}",
            &subs(&[("a", "1"), ("b", "2")]),
        );
        assert_eq!(result, "1 and 2 and 1");
    }

    #[test]
    fn test_substitute_unterminated_token() {
        let result = substitute("broken {{token", &subs(&[("token", "x")]));
        assert_eq!(result, "broken {{token");
    }

    #[test]
    fn test_personalize_covers_subject_and_body() {
        let payload = MessagePayload {
            subject: "Deal for {{name}}".to_string(),
            body: "Dear {{name}}, hello.".to_string(),
            headers: Vec::new(),
        };

        let personalized = payload.personalize(&subs(&[("name", "Ada")]));
        assert_eq!(personalized.subject, "Deal for Ada");
        assert_eq!(personalized.body, "Dear Ada, hello.");
    }

    #[test]
    fn test_inject_delivery_headers() {
        let mut payload = MessagePayload::default();
        let campaign = CampaignId::generate();
        let recipient = RecipientId::generate();
        let sender = EmailAddress::parse("news@mailer.example.com").unwrap();

        payload.inject_delivery_headers(campaign, recipient, &sender);

        assert!(
            payload
                .headers
                .iter()
                .any(|(k, v)| k == "X-Campaign-Id" && *v == campaign.to_string())
        );
        assert!(
            payload
                .headers
                .iter()
                .any(|(k, v)| k == "List-Unsubscribe"
                    && v.contains("mailer.example.com")
                    && v.contains(&campaign.to_string()))
        );
    }
}
