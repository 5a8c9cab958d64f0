//! Command vocabulary understood by the per-service supervisor.

use std::fmt;

/// Offset added to a subservice command byte to address the log subservice.
const LOG_SHIFT: u8 = 0x7f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Down,
    Up,
    Once,
    Pause,
    Continue,
    Alarm,
    Hangup,
    Interrupt,
    Kill,
    Quit,
    Terminate,
    Winch,
    Usr1,
    Usr2,
    /// Meta: take the whole service down (main and log).
    MetaDown,
    /// Meta: bring the whole service up.
    MetaUp,
    /// Meta: take the service down and exit the supervisor.
    MetaExit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    #[error("unknown control command '{0}'")]
    Unknown(String),

    #[error("meta-command '{0}' may not be used with the log subservice")]
    MetaForLog(String),
}

impl ControlCommand {
    /// Select a command from the first letter of `word` (`up`, `u`, `Up`...).
    pub fn from_word(word: &str) -> Result<Self, CommandParseError> {
        let first = word.bytes().next().unwrap_or(0);
        Self::from_code(first).ok_or_else(|| CommandParseError::Unknown(word.to_string()))
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let command = match code {
            b'd' => Self::Down,
            b'u' => Self::Up,
            b'o' => Self::Once,
            b'p' => Self::Pause,
            b'c' => Self::Continue,
            b'a' => Self::Alarm,
            b'h' => Self::Hangup,
            b'i' => Self::Interrupt,
            b'k' => Self::Kill,
            b'q' => Self::Quit,
            b't' => Self::Terminate,
            b'w' => Self::Winch,
            b'1' => Self::Usr1,
            b'2' => Self::Usr2,
            b'D' => Self::MetaDown,
            b'U' => Self::MetaUp,
            b'X' => Self::MetaExit,
            _ => return None,
        };
        Some(command)
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Down => b'd',
            Self::Up => b'u',
            Self::Once => b'o',
            Self::Pause => b'p',
            Self::Continue => b'c',
            Self::Alarm => b'a',
            Self::Hangup => b'h',
            Self::Interrupt => b'i',
            Self::Kill => b'k',
            Self::Quit => b'q',
            Self::Terminate => b't',
            Self::Winch => b'w',
            Self::Usr1 => b'1',
            Self::Usr2 => b'2',
            Self::MetaDown => b'D',
            Self::MetaUp => b'U',
            Self::MetaExit => b'X',
        }
    }

    pub fn is_meta(self) -> bool {
        matches!(self, Self::MetaDown | Self::MetaUp | Self::MetaExit)
    }

    /// Payload byte for this command, addressed to the main or log subservice.
    pub fn wire_code(self, for_log: bool) -> Result<u8, CommandParseError> {
        if !for_log {
            return Ok(self.code());
        }
        if self.is_meta() {
            return Err(CommandParseError::MetaForLog(self.to_string()));
        }
        Ok(self.code() + LOG_SHIFT)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", char::from(self.code()))
    }
}
