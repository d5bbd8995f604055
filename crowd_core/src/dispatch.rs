use std::sync::Arc;

use thiserror::Error;

use crate::outcome::WinnerResult;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("emulator not connected, dropped command #{0}")]
    EmulatorDisconnected(u64),
    #[error("overlay broadcast failed: {0}")]
    Overlay(String),
}

/// Accepts commands for the emulator. Must return without waiting on it.
pub trait EmulatorSink: Send + Sync {
    fn send_command(&self, result: &WinnerResult) -> Result<(), DispatchError>;
}

/// Announces executed commands to viewers. Must return without waiting on
/// any subscriber.
pub trait OverlaySink: Send + Sync {
    fn command_executed(&self, result: &WinnerResult) -> Result<(), DispatchError>;
}

/// Outcome of each leg of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub id: u64,
    pub emulator: Result<(), DispatchError>,
    pub overlay: Result<(), DispatchError>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.emulator.is_ok() && self.overlay.is_ok()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    emulator: Arc<dyn EmulatorSink>,
    overlay: Arc<dyn OverlaySink>,
}

impl Dispatcher {
    pub fn new(emulator: Arc<dyn EmulatorSink>, overlay: Arc<dyn OverlaySink>) -> Self {
        Self { emulator, overlay }
    }

    /// Hands `result` to both legs. A failing leg never keeps the other from
    /// running.
    pub fn dispatch(&self, result: &WinnerResult) -> DispatchReport {
        let emulator = self.emulator.send_command(result);
        if let Err(err) = &emulator {
            log::warn!("[dispatch] {err}");
        }
        let overlay = self.overlay.command_executed(result);
        if let Err(err) = &overlay {
            log::warn!("[dispatch] command #{}: {err}", result.id);
        }
        DispatchReport {
            id: result.id,
            emulator,
            overlay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Action, Command};
    use crate::outcome::CommandSource;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u64>>,
        fail: bool,
    }

    impl EmulatorSink for Recorder {
        fn send_command(&self, result: &WinnerResult) -> Result<(), DispatchError> {
            if self.fail {
                return Err(DispatchError::EmulatorDisconnected(result.id));
            }
            self.seen.lock().unwrap().push(result.id);
            Ok(())
        }
    }

    impl OverlaySink for Recorder {
        fn command_executed(&self, result: &WinnerResult) -> Result<(), DispatchError> {
            if self.fail {
                return Err(DispatchError::Overlay("no subscribers".to_string()));
            }
            self.seen.lock().unwrap().push(result.id);
            Ok(())
        }
    }

    fn result(id: u64) -> WinnerResult {
        WinnerResult {
            id,
            command: Command {
                action: Action::Press,
                button: "a".to_string(),
                team: None,
                raw: "a".to_string(),
            },
            vote_count: 1.0,
            first_voter_identity: Some("x".to_string()),
            first_voter_display_name: "X".to_string(),
            total_distinct_voters: 1,
            window: Some(1),
            team: None,
            source: CommandSource::Vote,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn failed_emulator_still_reaches_overlay() {
        let emulator = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let overlay = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(emulator, overlay.clone());

        let report = dispatcher.dispatch(&result(7));
        assert_eq!(report.emulator, Err(DispatchError::EmulatorDisconnected(7)));
        assert_eq!(report.overlay, Ok(()));
        assert!(!report.is_complete());
        assert_eq!(*overlay.seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn failed_overlay_still_reaches_emulator() {
        let emulator = Arc::new(Recorder::default());
        let overlay = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let dispatcher = Dispatcher::new(emulator.clone(), overlay);

        let report = dispatcher.dispatch(&result(3));
        assert!(report.emulator.is_ok());
        assert!(report.overlay.is_err());
        assert_eq!(*emulator.seen.lock().unwrap(), vec![3]);
    }
}
