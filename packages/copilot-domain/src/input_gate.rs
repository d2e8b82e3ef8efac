use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRejectReason {
	Empty,
	TooLong,
	InjectionPattern,
}
impl InputRejectReason {
	pub fn code(self) -> &'static str {
		match self {
			Self::Empty => "empty_query",
			Self::TooLong => "query_too_long",
			Self::InjectionPattern => "rejected_pattern",
		}
	}
}

/// Validates raw query text and returns it trimmed with PII redacted.
pub fn input_gate(text: &str, max_chars: u32) -> Result<String, InputRejectReason> {
	let text = text.trim();

	if text.is_empty() {
		return Err(InputRejectReason::Empty);
	}
	if text.chars().count() > max_chars as usize {
		return Err(InputRejectReason::TooLong);
	}
	if contains_injection(text) {
		return Err(InputRejectReason::InjectionPattern);
	}

	Ok(redact_pii(text))
}

fn contains_injection(text: &str) -> bool {
	let patterns = [
		r"(?i)ignore\s+(all\s+)?(the\s+)?(previous|prior|above)\s+(instructions|prompts?|rules)",
		r"(?i)disregard\s+(all\s+)?(the\s+)?(previous|prior|above)",
		r"(?i)you\s+are\s+now\s+(in\s+)?(developer|dan|jailbreak)",
		r"(?i)(reveal|print|show)\s+(me\s+)?(the\s+|your\s+)?system\s+prompt",
		r"(?i)<\s*/?\s*(system|assistant)\s*>",
		r"(?i)<script\b",
	];

	for pattern in patterns {
		if Regex::new(pattern).map(|re| re.is_match(text)).unwrap_or(false) {
			return true;
		}
	}

	false
}

fn redact_pii(text: &str) -> String {
	let rules = [
		(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b", "[EMAIL]"),
		(r"\b\d{3}-\d{2}-\d{4}\b", "[SSN]"),
		(r"(\+\d{1,2}[\s.-]?)?\(?\b\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b", "[PHONE]"),
	];
	let mut out = text.to_string();

	for (pattern, replacement) in rules {
		if let Ok(re) = Regex::new(pattern) {
			out = re.replace_all(&out, replacement).into_owned();
		}
	}

	out
}
