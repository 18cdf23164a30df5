//! Instruction contract and strict validation for generative risk assessments.

use clausegraph_core::{ClauseGraphError, Result, RiskLevel};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const REQUIRED_KEYS: [&str; 4] = ["risk_level", "issue", "explanation", "suggested_rewrite"];

pub const SAFE_DEFAULT_ISSUE: &str = "Risk could not be reliably determined.";
pub const SAFE_DEFAULT_EXPLANATION: &str =
    "The clause analysis could not be completed due to formatting inconsistencies.";

const SCHEMA_BLOCK: &str = r#"{
  "risk_level": "LOW" | "MEDIUM" | "HIGH",
  "issue": "string",
  "explanation": "string",
  "suggested_rewrite": "string"
}"#;

/// Prompt asking the validator to assess one clause.
pub fn analysis_prompt(clause: &str) -> String {
    format!(
        "You are a contract risk analysis engine.\n\n\
         Respond with a single JSON object and nothing else: no markdown, no commentary, \
         no additional keys.\n\n\
         The object must follow this schema exactly:\n\n\
         {SCHEMA_BLOCK}\n\n\
         Rules:\n\
         - risk_level is exactly LOW, MEDIUM or HIGH, in uppercase.\n\
         - Every field is filled with a non-empty string; never null.\n\
         - When the clause carries no risk, use LOW and say why.\n\
         - When you are unsure, use MEDIUM.\n\
         - suggested_rewrite is a safer version of the clause.\n\n\
         Assess the clause below and return only the JSON object.\n\n\
         Clause:\n{clause}"
    )
}

/// Prompt asking the validator to fix output that failed validation.
pub fn repair_prompt(invalid_output: &str) -> String {
    format!(
        "The JSON below is invalid and does not match the required schema.\n\n\
         Correct it so that it matches this schema exactly and respond with the JSON only.\n\n\
         Schema:\n{SCHEMA_BLOCK}\n\n\
         Rules:\n\
         - Do not add keys and do not drop any of the four keys.\n\
         - risk_level is LOW, MEDIUM or HIGH.\n\
         - Every value is a non-empty string.\n\n\
         Invalid output:\n{invalid_output}"
    )
}

/// Remove markdown code fences a model may wrap around its JSON.
pub fn strip_code_fences(raw: &str) -> String {
    raw.trim().replace("```json", "").replace("```", "").trim().to_string()
}

/// A validated generative assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub issue: String,
    pub explanation: String,
    pub suggested_rewrite: String,
}

impl RiskAssessment {
    /// Fixed result used when no valid assessment could be obtained.
    pub fn safe_default(clause: &str) -> Self {
        Self {
            risk_level: RiskLevel::Medium,
            issue: SAFE_DEFAULT_ISSUE.to_string(),
            explanation: SAFE_DEFAULT_EXPLANATION.to_string(),
            suggested_rewrite: clause.to_string(),
        }
    }
}

/// Parse raw validator output and enforce the schema: a JSON object whose key set is exactly
/// [`REQUIRED_KEYS`], an uppercase `risk_level` literal, and non-blank string fields.
pub fn validate_risk_output(raw: &str) -> Result<RiskAssessment> {
    let cleaned = strip_code_fences(raw);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| ClauseGraphError::Validation(format!("output is not valid JSON: {e}")))?;
    let Value::Object(object) = value else {
        return Err(ClauseGraphError::Validation(
            "output is not a JSON object".to_string(),
        ));
    };

    let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
    keys.sort_unstable();
    let mut expected = REQUIRED_KEYS;
    expected.sort_unstable();
    if keys != expected {
        return Err(ClauseGraphError::Validation(format!(
            "expected keys {expected:?}, found {keys:?}"
        )));
    }

    let risk_level: RiskLevel = string_field(&object, "risk_level")?.parse()?;
    let text = |field: &str| -> Result<String> {
        let value = string_field(&object, field)?;
        if value.trim().is_empty() {
            return Err(ClauseGraphError::Validation(format!("{field} is empty")));
        }
        Ok(value.to_string())
    };

    Ok(RiskAssessment {
        risk_level,
        issue: text("issue")?,
        explanation: text("explanation")?,
        suggested_rewrite: text("suggested_rewrite")?,
    })
}

fn string_field<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ClauseGraphError::Validation(format!("{field} must be a string")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{"risk_level":"HIGH","issue":"Short notice","explanation":"Three days is too short.","suggested_rewrite":"Either party may terminate with 30 days notice."}"#;

    #[test]
    fn accepts_exact_schema() {
        let assessment = validate_risk_output(VALID).unwrap();
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert_eq!(assessment.issue, "Short notice");
    }

    #[test]
    fn accepts_fenced_output() {
        let fenced = format!("```json\n{VALID}\n```");
        assert!(validate_risk_output(&fenced).is_ok());
    }

    #[test]
    fn rejects_missing_and_extra_keys() {
        let missing = r#"{"risk_level":"LOW","issue":"a","explanation":"b"}"#;
        let extra = r#"{"risk_level":"LOW","issue":"a","explanation":"b","suggested_rewrite":"c","score":1}"#;
        assert!(matches!(
            validate_risk_output(missing),
            Err(ClauseGraphError::Validation(_))
        ));
        assert!(matches!(
            validate_risk_output(extra),
            Err(ClauseGraphError::Validation(_))
        ));
    }

    #[test]
    fn rejects_bad_risk_level_and_blank_fields() {
        let lowercase = r#"{"risk_level":"high","issue":"a","explanation":"b","suggested_rewrite":"c"}"#;
        let critical = r#"{"risk_level":"CRITICAL","issue":"a","explanation":"b","suggested_rewrite":"c"}"#;
        let blank = r#"{"risk_level":"LOW","issue":"   ","explanation":"b","suggested_rewrite":"c"}"#;
        let null = r#"{"risk_level":"LOW","issue":null,"explanation":"b","suggested_rewrite":"c"}"#;
        for raw in [lowercase, critical, blank, null] {
            assert!(
                matches!(validate_risk_output(raw), Err(ClauseGraphError::Validation(_))),
                "accepted {raw}"
            );
        }
    }

    #[test]
    fn rejects_non_objects() {
        assert!(validate_risk_output("[1, 2]").is_err());
        assert!(validate_risk_output("risk is HIGH").is_err());
        assert!(validate_risk_output("").is_err());
    }

    #[test]
    fn prompts_embed_their_payload() {
        let clause = "Either party may terminate this agreement with only 3 days of notice.";
        assert!(analysis_prompt(clause).ends_with(&format!("Clause:\n{clause}")));
        assert!(repair_prompt("{bad").ends_with("Invalid output:\n{bad"));
    }

    #[test]
    fn safe_default_echoes_clause() {
        let fallback = RiskAssessment::safe_default("Payment is due on receipt.");
        assert_eq!(fallback.risk_level, RiskLevel::Medium);
        assert_eq!(fallback.suggested_rewrite, "Payment is due on receipt.");
        assert_eq!(fallback.issue, SAFE_DEFAULT_ISSUE);
    }
}
