// src/logging.rs

//! Engine log messages
//!
//! Every engine message is emitted as a `tracing` event and, when one is
//! registered, handed to the handle's log sink.

use std::cell::RefCell;
use std::fmt;
use tracing::{debug, error, trace, warn};

/// Severity of an engine log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error,
    Warning,
    Debug,
    /// Function-level tracing
    Function,
}

impl LogLevel {
    /// Map a raw level value onto a known level
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            1 => Some(LogLevel::Error),
            2 => Some(LogLevel::Warning),
            4 => Some(LogLevel::Debug),
            8 => Some(LogLevel::Function),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            LogLevel::Error => 1,
            LogLevel::Warning => 2,
            LogLevel::Debug => 4,
            LogLevel::Function => 8,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Debug => "debug",
            LogLevel::Function => "function",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback receiving engine log messages
pub type LogSink = Box<dyn FnMut(LogLevel, &str)>;

/// Routes messages to `tracing` and the registered sink
#[derive(Default)]
pub(crate) struct LogDispatch {
    sink: RefCell<Option<LogSink>>,
}

impl LogDispatch {
    pub(crate) fn set(&mut self, sink: LogSink) {
        *self.sink.get_mut() = Some(sink);
    }

    pub(crate) fn clear(&mut self) {
        *self.sink.get_mut() = None;
    }

    pub(crate) fn emit(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => error!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Function => trace!("{}", message),
        }

        // A sink that logs from inside its own callback would alias itself
        match self.sink.try_borrow_mut() {
            Ok(mut sink) => {
                if let Some(sink) = sink.as_mut() {
                    sink(level, message);
                }
            }
            Err(_) => warn!("Dropping re-entrant log message: {}", message),
        }
    }

    /// Emit a message with a raw level value; unknown levels are dropped
    pub(crate) fn emit_raw(&self, bits: u32, message: &str) {
        match LogLevel::from_bits(bits) {
            Some(level) => self.emit(level, message),
            None => warn!("Dropping log message with unknown level {}: {}", bits, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_level_bits_round_trip() {
        for level in [
            LogLevel::Error,
            LogLevel::Warning,
            LogLevel::Debug,
            LogLevel::Function,
        ] {
            assert_eq!(LogLevel::from_bits(level.bits()), Some(level));
        }
        assert_eq!(LogLevel::from_bits(0), None);
        assert_eq!(LogLevel::from_bits(3), None);
        assert_eq!(LogLevel::from_bits(16), None);
    }

    #[test]
    fn test_sink_receives_messages() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut dispatch = LogDispatch::default();
        let sink_seen = Rc::clone(&seen);
        dispatch.set(Box::new(move |level, msg| {
            sink_seen.borrow_mut().push((level, msg.to_string()));
        }));

        dispatch.emit(LogLevel::Warning, "disk almost full");
        dispatch.emit_raw(4, "checking dependencies");
        dispatch.emit_raw(99, "dropped");

        assert_eq!(
            *seen.borrow(),
            vec![
                (LogLevel::Warning, "disk almost full".to_string()),
                (LogLevel::Debug, "checking dependencies".to_string()),
            ]
        );

        dispatch.clear();
        dispatch.emit(LogLevel::Error, "nobody listens");
        assert_eq!(seen.borrow().len(), 2);
    }
}
