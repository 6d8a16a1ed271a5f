// src/state/session.rs
//
// Device session lifecycle.
//
// Browsers only allow audio after a user gesture, so the device cannot be
// created at load time. The session walks through
//   Uninitialized -> AwaitingUserGesture -> Active
// exactly once per page. `Active` is terminal.

use crate::error::{DeckError, DeckResult};
use crate::loader::GraphDescription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Resources are still loading.
    Uninitialized,
    /// Resources are ready; waiting for the first qualifying interaction.
    AwaitingUserGesture,
    /// The device exists and owns the audio output.
    Active,
}

/// Owns the device handle once it exists.
pub struct DeviceSession<D> {
    state: SessionState,

    /// Held until the device is created, then dropped.
    description: Option<GraphDescription>,

    device: Option<D>,
}

impl<D> DeviceSession<D> {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            description: None,
            device: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn description(&self) -> Option<&GraphDescription> {
        self.description.as_ref()
    }

    /// Resource loading succeeded.
    pub fn resources_loaded(&mut self, description: GraphDescription) {
        match self.state {
            SessionState::Uninitialized => {
                log::info!(
                    "graph description loaded (runtime {}), waiting for user gesture",
                    description.runtime_version()
                );
                self.description = Some(description);
                self.state = SessionState::AwaitingUserGesture;
            }
            state => log::warn!("ignoring graph description in state {state:?}"),
        }
    }

    /// Create the device on the first user gesture.
    ///
    /// Idempotent once active: later calls return the existing device and
    /// never invoke `create`. A failed `create` leaves the session waiting
    /// so the next gesture can try again.
    pub fn begin<F>(&mut self, create: F) -> DeckResult<&mut D>
    where
        F: FnOnce(&GraphDescription) -> DeckResult<D>,
    {
        if self.state == SessionState::AwaitingUserGesture {
            let description = self.description.as_ref().ok_or(DeckError::SessionNotReady)?;
            let device = create(description)?;
            self.activate(device)?;
        }
        self.device_mut().ok_or(DeckError::SessionNotReady)
    }

    /// Hand over a device created asynchronously.
    pub fn activate(&mut self, device: D) -> DeckResult<()> {
        match self.state {
            SessionState::AwaitingUserGesture => {
                self.device = Some(device);
                self.description = None;
                self.state = SessionState::Active;
                log::info!("device session active");
                Ok(())
            }
            SessionState::Uninitialized => Err(DeckError::SessionNotReady),
            SessionState::Active => {
                log::warn!("session already active, discarding second device");
                Ok(())
            }
        }
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> Option<&mut D> {
        self.device.as_mut()
    }
}

impl<D> Default for DeviceSession<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn description() -> GraphDescription {
        GraphDescription::from_json("test", r#"{ "desc": { "meta": { "rnboversion": "1.3.4" } } }"#)
            .unwrap()
    }

    #[test]
    fn test_begin_before_load_is_not_ready() {
        let mut session: DeviceSession<u32> = DeviceSession::new();
        assert!(matches!(session.begin(|_| Ok(1)), Err(DeckError::SessionNotReady)));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_begin_is_idempotent() {
        let mut session: DeviceSession<u32> = DeviceSession::new();
        session.resources_loaded(description());
        assert_eq!(session.state(), SessionState::AwaitingUserGesture);

        let mut created = 0;
        *session
            .begin(|_| {
                created += 1;
                Ok(7)
            })
            .unwrap() += 1;
        let device = *session
            .begin(|_| {
                created += 1;
                Ok(99)
            })
            .unwrap();

        assert_eq!(created, 1);
        assert_eq!(device, 8);
        assert!(session.is_active());
        assert!(session.description().is_none());
    }

    #[test]
    fn test_failed_create_stays_waiting() {
        let mut session: DeviceSession<u32> = DeviceSession::new();
        session.resources_loaded(description());

        let result = session.begin(|_| Err(DeckError::DeviceUnavailable));
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::AwaitingUserGesture);

        assert_eq!(*session.begin(|_| Ok(3)).unwrap(), 3);
    }

    #[test]
    fn test_second_description_ignored() {
        let mut session: DeviceSession<u32> = DeviceSession::new();
        session.resources_loaded(description());
        session.activate(1).unwrap();
        session.resources_loaded(description());
        assert_eq!(session.state(), SessionState::Active);
    }
}
