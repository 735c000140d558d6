// Shared prompt fragments for every completion call.
// Task-specific templates live next to the code that renders them
// (see `outreach::prompts`).

/// System prompt that keeps completions to the requested text only.
pub const PLAIN_TEXT_SYSTEM: &str = "You write concise business correspondence. \
    Respond with the requested text only. \
    Do NOT include a subject line, placeholders such as [Your Name], \
    markdown formatting, or any commentary about the text.";
