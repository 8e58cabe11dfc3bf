//! Decides whether an analysis is generic enough to share across projects

use once_cell::sync::Lazy;
use regex::Regex;

/// Error class names, errno codes, HTTP statuses and framework names that say
/// nothing about the tenant that produced them.
const GENERIC_SIGNATURES: &[&str] = &[
    // JavaScript
    "TypeError",
    "ReferenceError",
    "SyntaxError",
    "RangeError",
    "URIError",
    "EvalError",
    "AggregateError",
    "ChunkLoadError",
    "Cannot read property",
    "Cannot read properties of undefined",
    "is not a function",
    "is not defined",
    "Maximum call stack size exceeded",
    "Unexpected token",
    // Python
    "ValueError",
    "KeyError",
    "IndexError",
    "AttributeError",
    "ImportError",
    "ModuleNotFoundError",
    "ZeroDivisionError",
    "RecursionError",
    // JVM and .NET
    "NullPointerException",
    "IllegalArgumentException",
    "IllegalStateException",
    "ClassNotFoundException",
    "OutOfMemoryError",
    "NullReferenceException",
    "InvalidOperationException",
    // errno
    "ECONNREFUSED",
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EADDRINUSE",
    "EPIPE",
    "ENOENT",
    "EACCES",
    // Frameworks
    "React",
    "Next.js",
    "Vue",
    "Angular",
    "Express",
    "Django",
    "Flask",
    "Rails",
    "Laravel",
    "Spring",
    "AdonisJS",
];

const GENERIC_HTTP_STATUSES: &[u16] = &[
    400, 401, 403, 404, 405, 408, 409, 410, 413, 422, 429, 500, 501, 502, 503, 504,
];

/// Whole-word, case-insensitive match on any generic signature
static SIGNATURE_RE: Lazy<Regex> = Lazy::new(|| {
    let alternatives: Vec<String> = GENERIC_SIGNATURES.iter().map(|s| regex::escape(s)).collect();
    Regex::new(&format!(r"(?i)(?:^|\W)(?:{})(?:$|\W)", alternatives.join("|"))).unwrap()
});

/// A three-digit code only counts when it is introduced as an HTTP status
static HTTP_STATUS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:\bstatus(?:\s+code)?|\bhttp(?:/[\d.]+)?|\bresponse(?:\s+code)?)\s*[:=]?\s*(\d{3})\b",
    )
    .unwrap()
});

static STATUS_REASON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(\d{3})\s+(?:bad request|unauthorized|forbidden|not found|method not allowed|request timeout|conflict|gone|payload too large|unprocessable entity|too many requests|internal server error|not implemented|bad gateway|service unavailable|gateway timeout)\b",
    )
    .unwrap()
});

fn contains_http_status(pattern: &str) -> bool {
    HTTP_STATUS_RE
        .captures_iter(pattern)
        .chain(STATUS_REASON_RE.captures_iter(pattern))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u16>().ok())
        .any(|status| GENERIC_HTTP_STATUSES.contains(&status))
}

/// True when any pattern contains a known generic signature as a whole word, or
/// reports a common HTTP status
pub fn is_public_pattern<S: AsRef<str>>(patterns: &[S]) -> bool {
    patterns
        .iter()
        .map(AsRef::as_ref)
        .any(|pattern| SIGNATURE_RE.is_match(pattern) || contains_http_status(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_errors_are_public() {
        assert!(is_public_pattern(&["TypeError"]));
        assert!(is_public_pattern(&["connect ECONNREFUSED 127.0.0.1:5432"]));
        assert!(is_public_pattern(&["Request failed with status code 404"]));
        assert!(is_public_pattern(&["custom", "django.db.utils.OperationalError"]));
    }

    #[test]
    fn test_specific_errors_stay_private() {
        assert!(!is_public_pattern(&["InvoiceTotalMismatch"]));
        assert!(!is_public_pattern(&["order 12345 rejected"]));
        assert!(!is_public_pattern::<&str>(&[]));
    }

    #[test]
    fn test_signatures_match_whole_words_only() {
        assert!(!is_public_pattern(&["Invalid expression in Acme pricing rule"]));
        assert!(!is_public_pattern(&["Reactor core overloaded"]));
        assert!(!is_public_pattern(&["Springfield warehouse sync failed"]));
        assert!(is_public_pattern(&["Express middleware threw"]));
        assert!(is_public_pattern(&["Error in Next.js router"]));
        assert!(is_public_pattern(&["Uncaught TypeError: x is undefined"]));
    }

    #[test]
    fn test_status_codes_need_http_context() {
        assert!(!is_public_pattern(&["Ticket 500 could not be assigned"]));
        assert!(!is_public_pattern(&["SKU-404 out of stock"]));
        assert!(is_public_pattern(&["HTTP 503 from upstream"]));
        assert!(is_public_pattern(&["upstream answered 502 Bad Gateway"]));
        assert!(is_public_pattern(&["response code: 429"]));
        assert!(!is_public_pattern(&["status code 418"]));
    }
}
