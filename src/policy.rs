//! Domain-restriction policy: the system instruction sent to the model and
//! the fixed sentences the service can also emit on its own.

use lazy_static::lazy_static;
use regex::Regex;

use crate::utils::tokenize;
use crate::vector_db::RetrievedContext;

pub const DEFAULT_DOMAIN: &str = "breast cancer";
pub const DEFAULT_REFUSAL: &str = "I'm sorry, I can't help with that topic.";
pub const DEFAULT_CLOSING: &str = "You're welcome, I'm always happy to help. Stay healthy.";

lazy_static! {
    static ref THANKS: Regex = Regex::new(
        r"(?i)\b(thank\s*you|thanks|thank\s*u|thx|many thanks|much appreciated|appreciate it|teşekkür(ler|\s+ederim)?|sağ\s*ol(un)?)\b"
    )
    .expect("static regex");
}

/// Words that may surround a thanks without turning it into a question.
const COURTESY_FILLER: &[&str] = &[
    "very", "much", "so", "lot", "ok", "okay", "great", "again", "help", "helping",
    "answer", "answers", "information", "info", "bye", "goodbye", "cheers", "nice", "good",
    "çok", "yardımınız", "için", "bilgi",
];

/// Whether a user message is a thanks, and if so whether it also asks something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Courtesy {
    None,
    Only,
    WithQuestion,
}

#[derive(Debug, Clone)]
pub struct PromptPolicy {
    pub domain: String,
    pub refusal: String,
    pub closing: String,
}

impl Default for PromptPolicy {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            refusal: DEFAULT_REFUSAL.to_string(),
            closing: DEFAULT_CLOSING.to_string(),
        }
    }
}

impl PromptPolicy {
    pub fn new(domain: impl Into<String>, refusal: impl Into<String>, closing: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            refusal: refusal.into(),
            closing: closing.into(),
        }
    }

    /// The fixed instruction block, without context.
    pub fn instruction(&self) -> String {
        format!(
            "You are a chat assistant that behaves like a health professional and is trained to give \
             information about {domain}. \
             Build your answers only from the given context and never add information that is not in the document. \
             Your answers are for information only and do not replace diagnosis or treatment advice. \
             Expect clear questions from the user; if a question is ambiguous, ask for clarification instead of guessing. \
             People usually ask in natural language, for example 'What are they?', 'How is it done?', \
             'Who is at risk?' or 'What are the symptoms?'. \
             Understand such questions and find the matching headings in the context, \
             even when headings and content do not match word for word but are close in meaning. \
             When the user thanks you, always add a polite closing sentence such as \"{closing}\" \
             If you cannot find the answer in the context, say exactly \"{refusal}\" \
             Write your answers in at most four sentences and in plain language.",
            domain = self.domain,
            closing = self.closing,
            refusal = self.refusal,
        )
    }

    /// Instruction followed by the retrieved chunks, in rank order.
    pub fn system_prompt(&self, context: &RetrievedContext) -> String {
        let context_text = context.texts().collect::<Vec<_>>().join("\n\n");
        format!("{}\n\n{}", self.instruction(), context_text)
    }

    pub fn courtesy(&self, message: &str) -> Courtesy {
        if !THANKS.is_match(message) {
            return Courtesy::None;
        }
        if message.contains('?') {
            return Courtesy::WithQuestion;
        }

        let rest = THANKS.replace_all(message, " ");
        let asks_more = tokenize(&rest)
            .iter()
            .any(|token| !COURTESY_FILLER.contains(&token.as_str()));
        if asks_more {
            Courtesy::WithQuestion
        } else {
            Courtesy::Only
        }
    }

    /// True when the model output is the refusal sentence (modulo case and
    /// trailing punctuation).
    pub fn is_refusal(&self, answer: &str) -> bool {
        let answer = normalize_sentence(answer);
        let refusal = normalize_sentence(&self.refusal);
        !refusal.is_empty() && answer.starts_with(&refusal)
    }

    pub fn contains_closing(&self, answer: &str) -> bool {
        normalize_sentence(answer).contains(&normalize_sentence(&self.closing))
    }
}

fn normalize_sentence(text: &str) -> String {
    text.trim()
        .trim_end_matches(|c: char| c == '.' || c == '!' || c.is_whitespace())
        .replace('’', "'")
        .to_lowercase()
}
