// Staged boot: ordered, status-reporting sequence from agent registration to a running client.

pub mod sequencer;
pub mod shell;
pub mod stage;
