//! Evaluates commands on a dedicated thread.
use crate::json;
use glint_core::{
    expr::{Compiler, Options},
    value::{Value, Variables},
};

pub type CommandSender = crossbeam::channel::Sender<Command>;
pub type CommandReceiver = crossbeam::channel::Receiver<Command>;
pub type ReplySender = crossbeam::channel::Sender<Reply>;
pub type ReplyReceiver = crossbeam::channel::Receiver<Reply>;

/// Rendered result of a command.
pub type Reply = Result<String, Error>;

pub fn command_channel() -> (CommandSender, CommandReceiver) {
    crossbeam::channel::unbounded()
}

pub fn reply_channel() -> (ReplySender, ReplyReceiver) {
    crossbeam::channel::unbounded()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `:root <json>`
    Root(String),

    /// `:set <name> <json>`
    Set { name: String, json: String },

    /// `:template <text>`
    Template(String),

    /// Any other input.
    Eval(String),
}

impl Command {
    /// Parse a line of user input.
    /// `None` for blank lines and malformed commands.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        let Some(command) = input.strip_prefix(':') else {
            return Some(Self::Eval(input.to_string()));
        };

        let (name, rest) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
        let rest = rest.trim_start();
        match name {
            "root" if !rest.is_empty() => Some(Self::Root(rest.to_string())),
            "set" => {
                let (var, json) = rest.split_once(char::is_whitespace)?;
                Some(Self::Set {
                    name: var.to_string(),
                    json: json.trim().to_string(),
                })
            }
            "template" => Some(Self::Template(rest.to_string())),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Glint(#[from] glint_core::Error),
}

pub struct Worker {
    compiler: Compiler,
    root: Value,
    variables: Variables,
    command_rx: CommandReceiver,
    reply_tx: ReplySender,
}

impl Worker {
    pub fn new(options: Options, command_rx: CommandReceiver, reply_tx: ReplySender) -> Self {
        Self {
            compiler: Compiler::new(options),
            root: Value::Null,
            variables: Variables::new(),
            command_rx,
            reply_tx,
        }
    }

    /// Handle commands until either channel is closed.
    pub fn run(&mut self) {
        while let Ok(cmd) = self.command_rx.recv() {
            let reply = self.handle(cmd);
            if self.reply_tx.send(reply).is_err() {
                break;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("worker stopped");
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    pub fn handle(&mut self, cmd: Command) -> Reply {
        match cmd {
            Command::Root(text) => {
                self.root = json::parse(&text)?;
                Ok(json::render(&self.root)?)
            }
            Command::Set { name, json: text } => {
                let value = json::parse(&text)?;
                let rendered = json::render(&value)?;
                self.variables.insert(name, value);
                Ok(rendered)
            }
            Command::Template(text) => {
                let compiled = self.compiler.template(text)?;
                let value = compiled.execute(self.root.clone(), &self.variables)?;
                Ok(value.to_string())
            }
            Command::Eval(src) => {
                let compiled = self.compiler.expression(src)?;
                let value = compiled.execute(self.root.clone(), &self.variables)?;
                Ok(json::render(&value)?)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn worker() -> Worker {
        let (_command_tx, command_rx) = command_channel();
        let (reply_tx, _reply_rx) = reply_channel();
        Worker::new(Options::default(), command_rx, reply_tx)
    }

    #[test]
    fn parse_commands() {
        assert_eq!(Command::parse("  "), None);
        assert_eq!(Command::parse("1 + 1\n"), Some(Command::Eval("1 + 1".to_string())));
        assert_eq!(
            Command::parse(":root {\"a\": 1}"),
            Some(Command::Root("{\"a\": 1}".to_string()))
        );
        assert_eq!(
            Command::parse(":set n  [1, 2]"),
            Some(Command::Set {
                name: "n".to_string(),
                json: "[1, 2]".to_string()
            })
        );
        assert_eq!(
            Command::parse(":template a<% 1 %>"),
            Some(Command::Template("a<% 1 %>".to_string()))
        );
        assert_eq!(Command::parse(":set n"), None);
        assert_eq!(Command::parse(":root"), None);
        assert_eq!(Command::parse(":quit"), None);
    }

    #[test]
    fn session() {
        let mut worker = worker();
        worker.handle(Command::Root(r#"{"name": "glint"}"#.to_string())).unwrap();
        worker
            .handle(Command::Set {
                name: "n".to_string(),
                json: "2".to_string(),
            })
            .unwrap();

        let reply = worker.handle(Command::Eval("name.length() * $n".to_string()));
        assert_eq!(reply.unwrap(), "10");

        let reply = worker.handle(Command::Template("<% name %> x<% $n %>".to_string()));
        assert_eq!(reply.unwrap(), "glint x2");

        let reply = worker.handle(Command::Eval("1 +".to_string()));
        assert!(matches!(reply, Err(Error::Glint(_))));

        let reply = worker.handle(Command::Root("{".to_string()));
        assert!(matches!(reply, Err(Error::Json(_))));
    }

    #[test]
    fn run_replies_in_order() {
        let (command_tx, command_rx) = command_channel();
        let (reply_tx, reply_rx) = reply_channel();
        let handle = std::thread::spawn(move || {
            Worker::new(Options::default(), command_rx, reply_tx).run();
        });

        command_tx.send(Command::Eval("[1, 2]![$self * 3]".to_string())).unwrap();
        command_tx.send(Command::Eval("'a' + 'b'".to_string())).unwrap();
        drop(command_tx);

        assert_eq!(reply_rx.recv().unwrap().unwrap(), "[3,6]");
        assert_eq!(reply_rx.recv().unwrap().unwrap(), "\"ab\"");
        handle.join().unwrap();
    }
}
