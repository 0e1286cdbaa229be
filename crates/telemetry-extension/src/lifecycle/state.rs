// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ExtensionError;

/// Position of the extension in the host lifecycle protocol.
///
/// ```text
/// Init -> Registered -> { WaitNext -> Processing }* -> ShuttingDown -> Terminated
/// ```
///
/// Every state can move to `Terminated` when a fatal error ends the process early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Init,
    Registered,
    WaitNext,
    Processing,
    ShuttingDown,
    Terminated,
}

impl LifecycleState {
    /// Returns the new state if `to` is reachable from `self`.
    pub fn transition(self, to: LifecycleState) -> Result<LifecycleState, ExtensionError> {
        use LifecycleState::*;

        let allowed = matches!(
            (self, to),
            (Init, Registered)
                | (Registered, WaitNext)
                | (WaitNext, Processing)
                | (WaitNext, ShuttingDown)
                | (Processing, WaitNext)
                | (ShuttingDown, Terminated)
        ) || (to == Terminated && self != Terminated);

        if allowed {
            Ok(to)
        } else {
            Err(ExtensionError::InvalidTransition { from: self, to })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Terminated
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::*;
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = Init;
        for next in [
            Registered,
            WaitNext,
            Processing,
            WaitNext,
            Processing,
            WaitNext,
            ShuttingDown,
            Terminated,
        ] {
            state = state.transition(next).unwrap();
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn test_rejects_out_of_order() {
        let cases = [
            (Init, WaitNext),
            (Init, Processing),
            (Registered, Processing),
            (Processing, ShuttingDown),
            (Processing, Processing),
            (ShuttingDown, WaitNext),
            (Terminated, Registered),
            (Terminated, Terminated),
        ];
        for (from, to) in cases {
            match from.transition(to) {
                Err(ExtensionError::InvalidTransition { from: f, to: t }) => {
                    assert_eq!((f, t), (from, to));
                }
                other => panic!("{from:?} -> {to:?} should fail, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_any_live_state_can_terminate() {
        for from in [Init, Registered, WaitNext, Processing, ShuttingDown] {
            assert_eq!(from.transition(Terminated).unwrap(), Terminated);
        }
    }
}
