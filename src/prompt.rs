//! Yes/no confirmation before anything touches the remote.

use anyhow::{Context, Result};
use inquire::InquireError;

/// Asks the operator to confirm a step
pub trait Confirm {
    /// `Ok(false)` covers both "no" and an interrupted prompt
    fn confirm(&self, message: &str, default: bool) -> Result<bool>;
}

/// Check if we're running in an interactive terminal
pub fn is_interactive() -> bool {
    atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stdout)
}

/// Terminal prompt backed by `inquire`
#[derive(Debug, Clone, Copy, Default)]
pub struct InquireConfirm;

impl Confirm for InquireConfirm {
    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        if !is_interactive() {
            log::warn!("Not running in a terminal, treating '{message}' as declined");
            return Ok(false);
        }

        match inquire::Confirm::new(message).with_default(default).prompt() {
            Ok(answer) => Ok(answer),
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                log::debug!("Prompt interrupted");
                Ok(false)
            }
            Err(e) => Err(e).context("Failed to get confirmation"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::scripted::ScriptedConfirm;
    use super::*;

    #[test]
    fn test_scripted_answers_in_order() {
        let confirm = ScriptedConfirm::new(&[true, false]);
        assert!(confirm.confirm("first?", false).unwrap());
        assert!(!confirm.confirm("second?", true).unwrap());
        assert!(confirm.confirm("third?", true).is_err());
        assert_eq!(confirm.asked.borrow().len(), 3);
    }
}
