use log::info;

use super::types::ResponseCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Open {
        id: u32,
    },
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open { .. })
    }

    /// Closed -> Open. Fails without side effects when already open.
    pub fn open(&mut self, id: u32) -> Result<(), ResponseCode> {
        if let SessionState::Open { id: current } = self {
            info!("Session {} already open, refusing {}", current, id);
            return Err(ResponseCode::SessionAlreadyOpen);
        }
        *self = SessionState::Open { id };
        Ok(())
    }

    /// Open -> Closed. Fails without side effects when already closed.
    pub fn close(&mut self) -> Result<(), ResponseCode> {
        if !self.is_open() {
            return Err(ResponseCode::SessionNotOpen);
        }
        *self = SessionState::Closed;
        Ok(())
    }

    pub fn require_open(&self) -> Result<(), ResponseCode> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ResponseCode::SessionNotOpen)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_fail_in_the_wrong_state() {
        let mut state = SessionState::default();
        assert_eq!(state.require_open(), Err(ResponseCode::SessionNotOpen));
        assert_eq!(state.close(), Err(ResponseCode::SessionNotOpen));

        state.open(1).unwrap();
        assert_eq!(state.open(2), Err(ResponseCode::SessionAlreadyOpen));
        assert_eq!(state, SessionState::Open { id: 1 });

        state.close().unwrap();
        assert!(!state.is_open());
    }
}
