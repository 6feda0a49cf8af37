//! Structured answer extraction
//!
//! One extraction contract for every planner answer:
//!
//! 1. Take the content of the first choice of the completion.
//! 2. Trim it. If it is wrapped in a single markdown code fence (with or
//!    without a language tag), take the fenced body.
//! 3. The result must parse as a JSON object.
//! 4. The object is deserialized into the expected answer type.
//!
//! Anything else is an [`ExtractError`], which the planner treats as a bad
//! answer to retry rather than a backend failure.

use serde::de::DeserializeOwned;

use crate::error::ExtractError;
use crate::llm::GenerationResponse;

#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredAnswerExtractor;

impl StructuredAnswerExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract<T: DeserializeOwned>(
        &self,
        response: &GenerationResponse,
    ) -> Result<T, ExtractError> {
        let choice = response.choices.first().ok_or(ExtractError::NoChoices)?;
        self.extract_content(&choice.message.content)
    }

    pub fn extract_content<T: DeserializeOwned>(&self, content: &str) -> Result<T, ExtractError> {
        let body = strip_fence(content.trim());
        if body.is_empty() {
            return Err(ExtractError::EmptyContent);
        }

        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|e| ExtractError::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(ExtractError::NotAnObject);
        }

        serde_json::from_value(value).map_err(|e| ExtractError::Shape(e.to_string()))
    }
}

fn strip_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return content;
    };
    // drop the language tag line
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        value: i64,
    }

    fn extract(content: &str) -> Result<Answer, ExtractError> {
        StructuredAnswerExtractor::new().extract(&GenerationResponse::from_content(content))
    }

    #[test]
    fn test_plain_object() {
        assert_eq!(extract(" {\"value\": 3} \n").unwrap(), Answer { value: 3 });
    }

    #[test]
    fn test_fenced_object() {
        assert_eq!(
            extract("```json\n{\"value\": 4}\n```").unwrap(),
            Answer { value: 4 }
        );
        assert_eq!(extract("```\n{\"value\": 5}\n```").unwrap(), Answer { value: 5 });
    }

    #[test]
    fn test_rejections() {
        assert_eq!(extract("   ").unwrap_err(), ExtractError::EmptyContent);
        assert_eq!(extract("[1, 2]").unwrap_err(), ExtractError::NotAnObject);
        assert!(matches!(
            extract("Sure! {\"value\": 1}").unwrap_err(),
            ExtractError::InvalidJson(_)
        ));
        assert!(matches!(
            extract("{\"value\": \"x\"}").unwrap_err(),
            ExtractError::Shape(_)
        ));
    }

    #[test]
    fn test_no_choices() {
        let mut response = GenerationResponse::from_content("{}");
        response.choices.clear();
        let err = StructuredAnswerExtractor::new()
            .extract::<Answer>(&response)
            .unwrap_err();
        assert_eq!(err, ExtractError::NoChoices);
    }
}
