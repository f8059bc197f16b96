use crate::error::ExecError;

/// Script text that passed input validation. Trimmed, non-empty and within
/// the configured character limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSubmission {
    text: String,
}

impl ScriptSubmission {
    pub fn parse(raw: &str, max_chars: usize) -> Result<Self, ExecError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(ExecError::validation("'script' must not be empty"));
        }

        // Limit is in characters, not bytes.
        if text.chars().count() > max_chars {
            return Err(ExecError::validation("Script too large"));
        }

        Ok(Self {
            text: text.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len_bytes(&self) -> usize {
        self.text.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn trims_surrounding_whitespace() {
        let submission = ScriptSubmission::parse("\n\n  def main():\n    return {}\n  ", 100)
            .expect("valid script");
        assert_eq!(submission.text(), "def main():\n    return {}");
    }

    #[test]
    fn rejects_blank_script() {
        let err = ScriptSubmission::parse(" \t\n ", 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.message(), "'script' must not be empty");
    }

    #[test]
    fn accepts_script_at_exact_limit() {
        let text = "x".repeat(10_000);
        let submission = ScriptSubmission::parse(&text, 10_000).unwrap();
        assert_eq!(submission.text().len(), 10_000);
    }

    #[test]
    fn rejects_script_one_over_limit() {
        let text = "x".repeat(10_001);
        let err = ScriptSubmission::parse(&text, 10_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.message(), "Script too large");
    }

    #[test]
    fn limit_counts_characters_not_bytes() {
        // 'é' is two bytes in UTF-8.
        let text = "é".repeat(10);
        assert!(ScriptSubmission::parse(&text, 10).is_ok());
        assert!(ScriptSubmission::parse(&format!("{text}é"), 10).is_err());
    }

    #[test]
    fn limit_applies_after_trimming() {
        let text = format!("   {}   ", "x".repeat(10));
        assert!(ScriptSubmission::parse(&text, 10).is_ok());
    }
}
