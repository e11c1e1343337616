use std::str::FromStr;

use anyhow::bail;

pub const HELP: &str = "commands: silence [id] | relay-off [id] | reconnect | status | quit";

/// One line typed on the monitor's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Silence one device, or every alarming device.
    Silence(Option<String>),
    /// Switch the relay off on one device, or on every cached device.
    RelayOff(Option<String>),
    Reconnect,
    Status,
    Quit,
    Help,
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> anyhow::Result<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            bail!("empty command");
        };
        let target = words.next().map(str::to_owned);
        if words.next().is_some() {
            bail!("too many arguments; {HELP}");
        }

        let command = match (verb.to_ascii_lowercase().as_str(), target) {
            ("silence" | "ack", target) => ConsoleCommand::Silence(target),
            ("relay-off" | "relay_off", target) => ConsoleCommand::RelayOff(target),
            ("reconnect", None) => ConsoleCommand::Reconnect,
            ("status", None) => ConsoleCommand::Status,
            ("quit" | "exit", None) => ConsoleCommand::Quit,
            ("help" | "?", None) => ConsoleCommand::Help,
            (other, _) => bail!("unknown command {other:?}; {HELP}"),
        };
        Ok(command)
    }
}
