//! Input validators used by the registration and invite steps.
//!
//! Both functions are pure and total: any string in, a verdict out.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Minimum password length counted in characters.
pub const MIN_PASSWORD_LENGTH: usize = 12;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));

/// Which password rules passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PasswordChecks {
    pub length: bool,
    pub uppercase: bool,
    pub lowercase: bool,
    pub number: bool,
    pub special: bool,
}

impl PasswordChecks {
    /// Number of rules that passed (0..=5).
    pub fn passed(&self) -> usize {
        [
            self.length,
            self.uppercase,
            self.lowercase,
            self.number,
            self.special,
        ]
        .iter()
        .filter(|ok| **ok)
        .count()
    }
}

/// Password strength verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordStrength {
    /// 0 (weak) to 3 (strong).
    pub score: u8,
    pub checks: PasswordChecks,
    /// One hint per failed rule, empty when the password is strong.
    pub feedback: Vec<String>,
}

impl PasswordStrength {
    pub fn label(&self) -> &'static str {
        match self.score {
            3 => "strong",
            2 => "good",
            1 => "fair",
            _ => "weak",
        }
    }
}

/// Score a password against the five rules.
///
/// Score is 3 when all rules pass, 2 for four, 1 for three, 0 otherwise.
pub fn validate_password(password: &str) -> PasswordStrength {
    let checks = PasswordChecks {
        length: password.chars().count() >= MIN_PASSWORD_LENGTH,
        uppercase: password.chars().any(|c| c.is_uppercase()),
        lowercase: password.chars().any(|c| c.is_lowercase()),
        number: password.chars().any(|c| c.is_ascii_digit()),
        special: password
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace()),
    };

    let score = match checks.passed() {
        5 => 3,
        4 => 2,
        3 => 1,
        _ => 0,
    };

    let mut feedback = Vec::new();
    if !checks.length {
        feedback.push(format!("Use at least {MIN_PASSWORD_LENGTH} characters"));
    }
    if !checks.uppercase {
        feedback.push("Add an uppercase letter".to_string());
    }
    if !checks.lowercase {
        feedback.push("Add a lowercase letter".to_string());
    }
    if !checks.number {
        feedback.push("Add a number".to_string());
    }
    if !checks.special {
        feedback.push("Add a symbol such as ! or #".to_string());
    }

    PasswordStrength {
        score,
        checks,
        feedback,
    }
}

/// Syntactic `local@domain.tld` check. Surrounding whitespace is ignored.
pub fn validate_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_scores_zero() {
        let strength = validate_password("");
        assert_eq!(strength.score, 0);
        assert_eq!(strength.checks, PasswordChecks::default());
        assert_eq!(strength.feedback.len(), 5);
        assert_eq!(strength.label(), "weak");
    }

    #[test]
    fn all_classes_at_twelve_chars_is_strong() {
        let strength = validate_password("Aa1!aaaaaaaa");
        assert_eq!(strength.checks.passed(), 5);
        assert_eq!(strength.score, 3);
        assert!(strength.feedback.is_empty());
    }

    #[test]
    fn lowercase_only_scores_zero() {
        let strength = validate_password("aaaaaaaaaaaa");
        assert!(strength.checks.length);
        assert!(strength.checks.lowercase);
        assert_eq!(strength.checks.passed(), 2);
        assert_eq!(strength.score, 0);
    }

    #[test]
    fn score_steps_with_rule_count() {
        // length + lower + upper
        assert_eq!(validate_password("Aaaaaaaaaaaa").score, 1);
        // length + lower + upper + digit
        assert_eq!(validate_password("Aaaaaaaaaaa1").score, 2);
        // short but every class
        assert_eq!(validate_password("Aa1!").score, 2);
    }

    #[test]
    fn whitespace_is_not_a_symbol() {
        let strength = validate_password("Aaaaaa aaaa1");
        assert!(!strength.checks.special);
    }

    #[test]
    fn email_shapes() {
        assert!(validate_email("a@b.co"));
        assert!(validate_email("  a@b.co  "));
        assert!(validate_email("first.last+tag@mail.example.com"));
        assert!(!validate_email("not-an-email"));
        assert!(!validate_email("a@b"));
        assert!(!validate_email("a b@c.io"));
        assert!(!validate_email(""));
    }
}
