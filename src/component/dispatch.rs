//! Command decoding and dispatch.

use super::hooks::guard;
use super::Inner;
use crate::error::DaoError;
use crate::protocol::{self, Command, CommandMessage, LogLevel, ReplyMessage};
use crate::state_machine::Transition;

impl Inner {
    /// Decode one command frame and produce its reply. Never fails: every problem is
    /// answered with a FAILURE reply.
    pub(crate) fn handle_command(&self, frame: &[u8]) -> ReplyMessage {
        let command: CommandMessage = match protocol::decode(frame) {
            Ok(command) => command,
            Err(e) => {
                self.logger.warning(&format!("undecodable command: {e}"));
                return ReplyMessage::failure(format!("protocol error: {e}"));
            }
        };

        let Ok(function) = Command::try_from(command.function) else {
            self.logger
                .warning(&format!("Unknown command: {}", command.function));
            return ReplyMessage::failure(format!("Unknown command: {}", command.function));
        };

        let payload = command.payload.as_str();
        if self.logger.enabled(LogLevel::Trace) {
            self.logger.trace(&format!("command {function} '{payload}'"));
        }

        match function {
            Command::Exec => self.exec(payload),
            Command::Setup | Command::Update => {
                ReplyMessage::failure(format!("{function}: Function not implemented"))
            }
            Command::Ping => ReplyMessage::success(Some(std::process::id().to_string())),
            Command::State => ReplyMessage::success(Some(self.state().to_string())),
            Command::SetLogLevel => self.set_log_level(payload),
            Command::Dump => match guard(|| self.hooks.dump()) {
                Ok(dump) => ReplyMessage::success(Some(dump)),
                Err(e) => self.hook_failure(e),
            },
            Command::Other => match guard(|| self.hooks.process_other(payload)) {
                Ok((true, text)) => ReplyMessage::success(Some(text)),
                Ok((false, text)) => ReplyMessage::failure(text),
                Err(e) => self.hook_failure(e),
            },
            Command::Query => match self.variables.get(payload) {
                Some(value) => ReplyMessage::success(Some(value)),
                None => ReplyMessage::failure(format!("Unknown variable name: {payload}")),
            },
        }
    }

    fn exec(&self, name: &str) -> ReplyMessage {
        let result = Transition::from_exec_name(name)
            .ok_or_else(|| DaoError::UnknownTransition(name.to_string()))
            .and_then(|transition| self.fire(transition));
        match result {
            Ok(_) => ReplyMessage::success(None),
            Err(e) => {
                self.logger.warning(&e.to_string());
                ReplyMessage::failure(e.to_string())
            }
        }
    }

    fn set_log_level(&self, name: &str) -> ReplyMessage {
        match name.parse::<LogLevel>() {
            Ok(level) => {
                self.logger.set_level(level);
                ReplyMessage::success(None)
            }
            Err(e) => {
                self.logger.warning("unknown log level, level unchanged");
                ReplyMessage::failure(e.to_string())
            }
        }
    }

    fn hook_failure(&self, err: DaoError) -> ReplyMessage {
        self.logger.error(&err.to_string());
        ReplyMessage::failure(err.to_string())
    }
}
