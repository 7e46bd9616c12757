//! Operator confirmation prompts behind a replaceable port.

use std::io::{self, BufRead, Write};

pub trait ConfirmationPort {
    /// Ask a yes/no question. `default` is returned on empty input.
    fn confirm(&self, question: &str, default: bool) -> bool;
}

/// Prompts on stdout and reads one line from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

impl ConfirmationPort for StdinConfirm {
    fn confirm(&self, question: &str, default: bool) -> bool {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        print!("{} {}: ", question, hint);
        if io::stdout().flush().is_err() {
            return default;
        }
        let mut response = String::new();
        match io::stdin().lock().read_line(&mut response) {
            Ok(0) | Err(_) => default,
            Ok(_) => parse_answer(&response, default),
        }
    }
}

/// Non-interactive answer for CI, `--yes`/`--no` and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl ConfirmationPort for FixedAnswer {
    fn confirm(&self, question: &str, _default: bool) -> bool {
        tracing::debug!("Auto-answering '{}' with {}", question, if self.0 { "yes" } else { "no" });
        self.0
    }
}

fn parse_answer(response: &str, default: bool) -> bool {
    let answer = response.trim();
    if answer.is_empty() {
        return default;
    }
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_parse_case_insensitively() {
        assert!(parse_answer("Y\n", false));
        assert!(parse_answer("yes", false));
        assert!(!parse_answer("n", true));
        assert!(!parse_answer("maybe", true));
        assert!(parse_answer("  \n", true));
        assert!(!parse_answer("", false));
    }

    #[test]
    fn fixed_answer_ignores_default() {
        assert!(FixedAnswer(true).confirm("restart?", false));
        assert!(!FixedAnswer(false).confirm("restart?", true));
    }
}
