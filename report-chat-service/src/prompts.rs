use report_kit::{ChatTurn, Role};

/// Number of most recent turns replayed to the model.
pub const PROMPT_HISTORY_TURNS: usize = 10;

pub const ASSISTANT_PREAMBLE: &str =
    "You are a medical assistant that simplifies medical reports for patients.";

pub const EXTRACTION_PREAMBLE: &str =
    "You are a medical data extraction specialist. You answer with JSON only.";

pub fn chat_prompt(report_text: &str, history: &[ChatTurn], message: &str, language: &str) -> String {
    let mut prompt = format!(
        "You are a medical assistant that simplifies medical reports for patients.

### Guidelines
1. Respond in {language}.
2. Use **plain, to-the-point explanations**.
   - Example: \"Your vitamin D is low → may cause tiredness and weak bones.\"
3. For lab values, categorize as:
   - NORMAL, SLIGHTLY_ABNORMAL, CRITICAL
   - Format: **[TYPE:value]**
4. After each result:
   - Explain in plain words
   - Cite a trusted source (Mayo Clinic, CDC, NIH, etc.)
   - Give simple lifestyle advice if relevant
5. Be empathetic but concise.
6. Always advise consulting a healthcare provider.
7. If the user asks unrelated questions, redirect them to the report.

### Formatting
- Use ## for main sections, ### for subsections
- Bold key terms and values
- Bullets for lists
- Plain explanation and lifestyle tips under each abnormal finding

### Example
## Your Test Results

- **Glucose**: **[SLIGHTLY_ABNORMAL:110 mg/dL]**
  *Plain English:* Slightly high blood sugar, may mean risk of diabetes.
  *(Source: CDC)*
  *Lifestyle Tip:* Cut down on sweets, walk daily.

- **Cholesterol**: **[CRITICAL:280 mg/dL]**
  *Plain English:* Very high cholesterol, raises heart disease risk.
  *(Source: AHA)*
  *Lifestyle Tip:* Eat more vegetables, avoid fried foods, see your doctor soon.

---

MEDICAL REPORT CONTEXT:
{report_text}

CONVERSATION HISTORY:
"
    );

    let start = history.len().saturating_sub(PROMPT_HISTORY_TURNS);
    for turn in &history[start..] {
        let speaker = match turn.role {
            Role::User => "Patient",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(&format!("{}: {}\n", speaker, turn.content));
    }

    prompt.push_str(&format!("\nPatient: {}\nAssistant:", message));
    prompt
}

pub fn lab_extraction_prompt(report_text: &str) -> String {
    format!(
        "Extract lab test results from the provided medical report text.

INSTRUCTIONS:
1. Extract ONLY laboratory test results with numerical values
2. For each test, extract: test name, patient value, unit, reference range, and status
3. Classify each result as NORMAL, SLIGHTLY_ABNORMAL, or CRITICAL based on reference ranges
4. Return ONLY a valid JSON array - no markdown, no explanations

JSON FORMAT REQUIRED:
[
  {{
    \"test\": \"Test Name\",
    \"value\": numeric_value,
    \"unit\": \"unit\",
    \"range\": \"reference_range\",
    \"status\": \"NORMAL|SLIGHTLY_ABNORMAL|CRITICAL\",
    \"explanation\": \"Brief explanation of what this test measures\"
  }}
]

CLASSIFICATION RULES:
- NORMAL: Value within reference range
- SLIGHTLY_ABNORMAL: Value 10-30% outside reference range
- CRITICAL: Value >30% outside reference range or clinically dangerous

MEDICAL REPORT TEXT:
{report_text}

Extract lab data as JSON array:"
    )
}
