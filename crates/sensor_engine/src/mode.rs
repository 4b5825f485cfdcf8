//! Operating-mode controller
//!
//! Pure transition table. The engine performs the device side effects and
//! commits the new mode only once they succeeded.
//!
//! | from \ to      | Restricted(P) | DataInjection(P) | Normal |
//! |----------------|---------------|------------------|--------|
//! | Normal         | enter         | enter            | no-op  |
//! | Restricted     | no-op         | error            | exit   |
//! | DataInjection  | error         | no-op            | exit   |

use contracts::{ClientIdentity, ConnectionMode, EngineError, OperatingMode};

/// What a requested transition requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already in the requested mode
    Unchanged,
    /// Perform the transition
    Enter,
}

#[derive(Debug, Default)]
pub struct ModeController {
    mode: OperatingMode,
}

impl ModeController {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn mode(&self) -> &OperatingMode {
        &self.mode
    }

    #[inline]
    pub fn is_normal(&self) -> bool {
        self.mode == OperatingMode::Normal
    }

    #[inline]
    pub fn is_data_injection(&self) -> bool {
        matches!(self.mode, OperatingMode::DataInjection(_))
    }

    /// Gate for enable, flush and set_rate
    pub fn check_caller(&self, identity: &ClientIdentity) -> Result<(), EngineError> {
        if self.mode.permits(&identity.package) {
            Ok(())
        } else {
            Err(EngineError::permission_denied(
                identity.package.clone(),
                format!("operating mode is {}", self.mode),
            ))
        }
    }

    /// Gate for connection creation
    pub fn check_connection(
        &self,
        identity: &ClientIdentity,
        mode: ConnectionMode,
    ) -> Result<(), EngineError> {
        if mode == ConnectionMode::Normal {
            return Ok(());
        }
        match &self.mode {
            OperatingMode::DataInjection(p) if *p == identity.package => Ok(()),
            OperatingMode::DataInjection(_) => Err(EngineError::invalid_mode(format!(
                "'{}' is not whitelisted for data injection",
                identity.package
            ))),
            other => Err(EngineError::invalid_mode(format!(
                "data injection connections need data_injection mode, current mode is {other}"
            ))),
        }
    }

    pub fn plan_restricted(&self) -> Result<Transition, EngineError> {
        match self.mode {
            OperatingMode::Normal => Ok(Transition::Enter),
            OperatingMode::Restricted(_) => Ok(Transition::Unchanged),
            OperatingMode::DataInjection(_) => Err(EngineError::invalid_mode(
                "cannot enter restricted mode from data_injection",
            )),
        }
    }

    pub fn plan_data_injection(&self) -> Result<Transition, EngineError> {
        match self.mode {
            OperatingMode::Normal => Ok(Transition::Enter),
            OperatingMode::DataInjection(_) => Ok(Transition::Unchanged),
            OperatingMode::Restricted(_) => Err(EngineError::invalid_mode(
                "cannot enter data_injection mode from restricted",
            )),
        }
    }

    pub fn plan_normal(&self) -> Transition {
        if self.is_normal() {
            Transition::Unchanged
        } else {
            Transition::Enter
        }
    }

    /// Commit a transition. Returns the previous mode.
    pub fn commit(&mut self, mode: OperatingMode) -> OperatingMode {
        std::mem::replace(&mut self.mode, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        let mut ctl = ModeController::new();
        assert_eq!(ctl.plan_normal(), Transition::Unchanged);
        assert_eq!(ctl.plan_restricted(), Ok(Transition::Enter));
        assert_eq!(ctl.plan_data_injection(), Ok(Transition::Enter));

        ctl.commit(OperatingMode::Restricted("com.cts".into()));
        assert_eq!(ctl.plan_restricted(), Ok(Transition::Unchanged));
        assert!(matches!(
            ctl.plan_data_injection(),
            Err(EngineError::InvalidOperatingMode { .. })
        ));
        assert_eq!(ctl.plan_normal(), Transition::Enter);

        ctl.commit(OperatingMode::DataInjection("com.cts".into()));
        assert_eq!(ctl.plan_data_injection(), Ok(Transition::Unchanged));
        assert!(ctl.plan_restricted().is_err());
    }

    #[test]
    fn test_caller_gate() {
        let mut ctl = ModeController::new();
        let cts = ClientIdentity::new("com.cts", 1);
        let other = ClientIdentity::new("com.other", 2);
        assert!(ctl.check_caller(&other).is_ok());

        ctl.commit(OperatingMode::Restricted("com.cts".into()));
        assert!(ctl.check_caller(&cts).is_ok());
        assert!(matches!(
            ctl.check_caller(&other),
            Err(EngineError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_injection_connection_gate() {
        let mut ctl = ModeController::new();
        let cts = ClientIdentity::new("com.cts", 1);
        let other = ClientIdentity::new("com.other", 2);
        assert!(ctl.check_connection(&cts, ConnectionMode::Normal).is_ok());
        assert!(ctl
            .check_connection(&cts, ConnectionMode::DataInjection)
            .is_err());

        ctl.commit(OperatingMode::DataInjection("com.cts".into()));
        assert!(ctl
            .check_connection(&cts, ConnectionMode::DataInjection)
            .is_ok());
        assert!(matches!(
            ctl.check_connection(&other, ConnectionMode::DataInjection),
            Err(EngineError::InvalidOperatingMode { .. })
        ));
    }
}
