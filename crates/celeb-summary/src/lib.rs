//! celeb-summary: short biographies for predicted class labels.
//!
//! A [`SummaryGenerator`] produces free text for a display name. The
//! [`get_celebrity_summary`] policy wraps it so callers always get a
//! sentence back, whether or not a generator is configured or reachable.

use async_trait::async_trait;
use thiserror::Error;

pub mod gemini;

pub use gemini::{GeminiClient, GeminiConfig};

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("summary service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("summary service is not configured: {0}")]
    Config(String),
}

/// Text generation capability used for athlete profiles.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    /// Generate a profile for `name`. An empty string means "nothing to say".
    async fn summarize(&self, name: &str) -> Result<String, SummaryError>;
}

/// The instruction sent to the text service for one athlete.
pub fn profile_prompt(name: &str) -> String {
    format!(
        "Give a concise, engaging profile (around 120-180 words) of the sports person {name}. \
         Include: sport, nationality, major achievements/titles, style of play, impact on their sport, \
         and 1–2 interesting or fun facts. \
         Write in plain text (no bullet points, no headings)."
    )
}

/// `virat_kohli` → `Virat Kohli`.
///
/// Underscores become spaces; every run of letters is title-cased, so a
/// letter following any non-letter starts a new word.
pub fn pretty_name_from_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut in_word = false;
    for c in label.chars() {
        let c = if c == '_' { ' ' } else { c };
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Profile text for a class label. Never fails.
pub async fn get_celebrity_summary(generator: Option<&dyn SummaryGenerator>, label: &str) -> String {
    let name = pretty_name_from_label(label);
    if name.is_empty() {
        return "Unknown person.".to_string();
    }

    let Some(generator) = generator else {
        return format!(
            "{name} is a famous sports personality. (AI summary not available because Gemini is not configured.)"
        );
    };

    match generator.summarize(&name).await {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                format!("{name} is a well-known sportsperson, but I couldn’t fetch detailed information right now.")
            } else {
                text.to_string()
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, name = %name, "summary generation failed");
            format!("Could not fetch AI summary for {name} at the moment.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<&'static str, u16>);

    #[async_trait]
    impl SummaryGenerator for Canned {
        async fn summarize(&self, name: &str) -> Result<String, SummaryError> {
            match self.0 {
                Ok(text) => Ok(text.replace("{name}", name)),
                Err(status) => Err(SummaryError::Status {
                    status,
                    body: String::new(),
                }),
            }
        }
    }

    #[test]
    fn test_pretty_name() {
        assert_eq!(pretty_name_from_label("virat_kohli"), "Virat Kohli");
        assert_eq!(pretty_name_from_label("LIONEL_MESSI"), "Lionel Messi");
        assert_eq!(pretty_name_from_label("serena"), "Serena");
        assert_eq!(pretty_name_from_label(""), "");
    }

    #[test]
    fn test_pretty_name_follows_title_case_rules() {
        assert_eq!(pretty_name_from_label("shaquille_o'neal"), "Shaquille O'Neal");
        assert_eq!(pretty_name_from_label("mo_salah2x"), "Mo Salah2X");
        assert_eq!(pretty_name_from_label("__x"), "  X");
    }

    #[test]
    fn test_prompt_names_the_athlete() {
        let prompt = profile_prompt("Roger Federer");
        assert!(prompt.contains("sports person Roger Federer."));
        assert!(prompt.contains("120-180 words"));
        assert!(prompt.ends_with("(no bullet points, no headings)."));
    }

    #[tokio::test]
    async fn test_empty_label_is_unknown() {
        assert_eq!(get_celebrity_summary(None, "").await, "Unknown person.");
    }

    #[tokio::test]
    async fn test_without_generator_mentions_name() {
        let s = get_celebrity_summary(None, "virat_kohli").await;
        assert_eq!(
            s,
            "Virat Kohli is a famous sports personality. (AI summary not available because Gemini is not configured.)"
        );
    }

    #[tokio::test]
    async fn test_generated_text_is_trimmed() {
        let g = Canned(Ok("  {name} plays football.\n"));
        let s = get_celebrity_summary(Some(&g), "lionel_messi").await;
        assert_eq!(s, "Lionel Messi plays football.");
    }

    #[tokio::test]
    async fn test_blank_generated_text_falls_back() {
        let g = Canned(Ok("   "));
        let s = get_celebrity_summary(Some(&g), "maria_sharapova").await;
        assert_eq!(
            s,
            "Maria Sharapova is a well-known sportsperson, but I couldn’t fetch detailed information right now."
        );
    }

    #[tokio::test]
    async fn test_service_failure_falls_back() {
        let g = Canned(Err(503));
        let s = get_celebrity_summary(Some(&g), "roger_federer").await;
        assert_eq!(s, "Could not fetch AI summary for Roger Federer at the moment.");
    }
}
