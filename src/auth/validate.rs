//! Input validation for the auth use cases.

use regex::Regex;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 50;
pub const PASSWORD_MIN: usize = 6;
pub const PASSWORD_MAX: usize = 128;
pub const NAME_MAX: usize = 50;

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

#[must_use]
pub fn valid_username(username: &str) -> bool {
    (USERNAME_MIN..=USERNAME_MAX).contains(&username.chars().count())
        && username.chars().all(|c| c.is_ascii_alphanumeric())
}

#[must_use]
pub fn valid_password(password: &str) -> bool {
    (PASSWORD_MIN..=PASSWORD_MAX).contains(&password.chars().count())
}

#[must_use]
pub fn valid_name(name: &str) -> bool {
    (1..=NAME_MAX).contains(&name.trim().chars().count())
}

/// Collects validation messages so the caller gets all of them at once.
#[derive(Debug, Default)]
pub struct Violations(Vec<String>);

impl Violations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, message: &str) {
        if !ok {
            self.0.push(message.to_string());
        }
    }

    /// `Ok(())` when nothing was recorded, otherwise the messages.
    ///
    /// # Errors
    /// Returns the collected messages when any check failed.
    pub fn finish(self) -> Result<(), Vec<String>> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self.0)
        }
    }
}
