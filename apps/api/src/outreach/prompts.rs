// Prompt template for outreach drafts. The rendered text is a pure function
// of the resolved roles and the length limit, so identical rows always send
// identical prompts.

use crate::outreach::resolver::ResolvedRoles;
use crate::outreach::roles::SemanticRole;

/// Outreach prompt template.
/// Replace: {recipient}, {title_clause}, {context_clause}, {length_instruction}
pub const OUTREACH_PROMPT_TEMPLATE: &str = "Write a brief, professional outreach email \
to {recipient}.{title_clause}{context_clause} \
Keep the tone warm and genuine, never salesy or pushy, and end with a light invitation to connect. \
{length_instruction}";

/// Maximum length requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthLimit {
    Sentences(u32),
    Words(u32),
}

impl LengthLimit {
    pub fn instruction(&self) -> String {
        match self {
            LengthLimit::Sentences(n) => format!("Use at most {n} sentences."),
            LengthLimit::Words(n) => format!("Use at most {n} words."),
        }
    }

    /// Token budget with headroom over the requested length, so the model
    /// finishes its last sentence instead of being cut off.
    pub fn token_budget(&self) -> u32 {
        match self {
            LengthLimit::Sentences(n) => n.saturating_mul(40).saturating_add(64),
            LengthLimit::Words(n) => n.saturating_mul(2).saturating_add(64),
        }
    }
}

impl Default for LengthLimit {
    fn default() -> Self {
        LengthLimit::Sentences(5)
    }
}

/// Renders the prompt for a row that passed the gate.
pub fn render_prompt(roles: &ResolvedRoles, limit: LengthLimit) -> String {
    let name = roles.get(SemanticRole::FirstName);
    let company = roles.get(SemanticRole::Company);

    let recipient = match (name, company) {
        (Some(name), Some(company)) => format!("{name} at {company}"),
        (Some(name), None) => name.to_string(),
        (None, Some(company)) => format!("the team at {company}"),
        (None, None) => "a new professional contact".to_string(),
    };

    let title_clause = roles
        .get(SemanticRole::Title)
        .map(|title| format!(" Their role is {title}; reference it naturally."))
        .unwrap_or_default();

    let mut context_clause = String::new();
    if let Some(industry) = roles.get(SemanticRole::Industry) {
        context_clause.push_str(&format!(" They work in the {industry} industry."));
    }
    let location: Vec<&str> = [SemanticRole::City, SemanticRole::State, SemanticRole::Country]
        .into_iter()
        .filter_map(|role| roles.get(role))
        .collect();
    if !location.is_empty() {
        context_clause.push_str(&format!(" They are based in {}.", location.join(", ")));
    }

    let length_instruction = limit.instruction();
    fill_template(
        OUTREACH_PROMPT_TEMPLATE,
        &[
            ("{recipient}", recipient.as_str()),
            ("{title_clause}", title_clause.as_str()),
            ("{context_clause}", context_clause.as_str()),
            ("{length_instruction}", length_instruction.as_str()),
        ],
    )
}

/// Substitutes placeholders in one pass over the template. Inserted values
/// are never scanned again, so row text that looks like a placeholder stays as is.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
