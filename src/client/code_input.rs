//! Second-factor code entry: 6-digit TOTP or 8-character backup code.

/// Input mode of the verification dialog.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CodeMode {
    #[default]
    Totp,
    Backup,
}

impl CodeMode {
    /// Length at which the code is submitted.
    #[must_use]
    pub fn code_len(self) -> usize {
        match self {
            Self::Totp => 6,
            Self::Backup => 8,
        }
    }

    fn accepts(self, c: char) -> bool {
        match self {
            Self::Totp => c.is_ascii_digit(),
            Self::Backup => c.is_ascii_alphanumeric(),
        }
    }
}

/// A complete code ready to be sent to `/auth/verify-2fa-login`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SecondFactorCode {
    Totp(String),
    Backup(String),
}

#[derive(Clone, Debug, Default)]
pub struct CodeInput {
    mode: CodeMode,
    value: String,
}

impl CodeInput {
    #[must_use]
    pub fn new(mode: CodeMode) -> Self {
        Self {
            mode,
            value: String::new(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> CodeMode {
        self.mode
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Switch between TOTP and backup code entry. Clears the current input.
    pub fn toggle_mode(&mut self) {
        self.mode = match self.mode {
            CodeMode::Totp => CodeMode::Backup,
            CodeMode::Backup => CodeMode::Totp,
        };
        self.clear();
    }

    /// Replace the field contents with `raw`, filtered for the current mode.
    ///
    /// Returns the code once it reaches the mode's length; shorter input
    /// returns `None` and is never submitted.
    pub fn set(&mut self, raw: &str) -> Option<SecondFactorCode> {
        let mode = self.mode;
        self.value = raw
            .chars()
            .filter(|c| mode.accepts(*c))
            .map(|c| c.to_ascii_uppercase())
            .take(mode.code_len())
            .collect();
        self.complete()
    }

    /// Append typed characters to the current value.
    pub fn push_str(&mut self, typed: &str) -> Option<SecondFactorCode> {
        let combined = format!("{}{typed}", self.value);
        self.set(&combined)
    }

    /// Reset after a rejected code.
    pub fn clear(&mut self) {
        self.value.clear();
    }

    #[must_use]
    pub fn complete(&self) -> Option<SecondFactorCode> {
        if self.value.len() != self.mode.code_len() {
            return None;
        }
        Some(match self.mode {
            CodeMode::Totp => SecondFactorCode::Totp(self.value.clone()),
            CodeMode::Backup => SecondFactorCode::Backup(self.value.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totp_keeps_digits_and_submits_at_six() {
        let mut input = CodeInput::new(CodeMode::Totp);
        assert_eq!(input.set("12a3-4"), None);
        assert_eq!(input.value(), "1234");
        assert_eq!(input.push_str("5"), None);
        assert_eq!(
            input.push_str("67"),
            Some(SecondFactorCode::Totp("123456".to_string()))
        );
        assert_eq!(input.value(), "123456");
    }

    #[test]
    fn short_codes_never_submit() {
        let mut input = CodeInput::new(CodeMode::Totp);
        for partial in ["", "1", "12345", "12 34 5"] {
            assert_eq!(input.set(partial), None);
        }
    }

    #[test]
    fn backup_mode_uppercases_alphanumerics_and_submits_at_eight() {
        let mut input = CodeInput::new(CodeMode::Totp);
        input.set("123");
        input.toggle_mode();
        assert_eq!(input.mode(), CodeMode::Backup);
        assert_eq!(input.value(), "");

        assert_eq!(input.set("a1b2-c3d"), None);
        assert_eq!(input.value(), "A1B2C3D");
        assert_eq!(
            input.push_str("4ff"),
            Some(SecondFactorCode::Backup("A1B2C3D4".to_string()))
        );
    }

    #[test]
    fn clear_empties_the_field() {
        let mut input = CodeInput::default();
        input.set("654321");
        input.clear();
        assert_eq!(input.value(), "");
        assert_eq!(input.complete(), None);
    }
}
