//! Lifecycle events consumed by the reclaim priority engine.
//!
//! Every source (app state, ability state, background tasks, account
//! switches) is normalized into a [`ReclaimEvent`] before it reaches the
//! engine queue.

use crate::priority::{Pid, Uid};
use serde::{Deserialize, Serialize};

/// Why a process's reclaim priority may need to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReclaimReason {
    CreateProcess,
    ProcessReady,
    ProcessTerminated,
    Foreground,
    Background,
    ApplicationSuspend,
    SuspendDelayStart,
    SuspendDelayEnd,
    BackgroundRunningStart,
    BackgroundRunningEnd,
    EventStart,
    EventEnd,
    DataAbilityStart,
    DataAbilityEnd,
    Visible,
    UnVisible,
    DistDeviceConnected,
    DistDeviceDisconnected,
    BindExtension,
    UnbindExtension,
    AbilityStart,
    Freeze,
    Unfreeze,
    /// Hot account switch. `target_uid` carries any uid of the new account.
    OsAccountChanged,
}

impl ReclaimReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateProcess => "CREATE_PROCESS",
            Self::ProcessReady => "PROCESS_READY",
            Self::ProcessTerminated => "PROCESS_TERMINATED",
            Self::Foreground => "FOREGROUND",
            Self::Background => "BACKGROUND",
            Self::ApplicationSuspend => "APPLICATION_SUSPEND",
            Self::SuspendDelayStart => "SUSPEND_DELAY_START",
            Self::SuspendDelayEnd => "SUSPEND_DELAY_END",
            Self::BackgroundRunningStart => "BACKGROUND_RUNNING_START",
            Self::BackgroundRunningEnd => "BACKGROUND_RUNNING_END",
            Self::EventStart => "EVENT_START",
            Self::EventEnd => "EVENT_END",
            Self::DataAbilityStart => "DATA_ABILITY_START",
            Self::DataAbilityEnd => "DATA_ABILITY_END",
            Self::Visible => "VISIBLE",
            Self::UnVisible => "UN_VISIBLE",
            Self::DistDeviceConnected => "DIST_DEVICE_CONNECTED",
            Self::DistDeviceDisconnected => "DIST_DEVICE_DISCONNECTED",
            Self::BindExtension => "BIND_EXTENSION",
            Self::UnbindExtension => "UNBIND_EXTENSION",
            Self::AbilityStart => "ABILITY_START",
            Self::Freeze => "FREEZE",
            Self::Unfreeze => "UNFREEZE",
            Self::OsAccountChanged => "OS_ACCOUNT_CHANGED",
        }
    }

    /// Reasons whose boost is reverted automatically after the grace period
    /// unless a later event for the same pid supersedes it.
    pub fn arms_grace_timer(&self) -> bool {
        matches!(
            self,
            Self::AbilityStart | Self::Visible | Self::DistDeviceConnected | Self::BindExtension
        )
    }
}

impl std::fmt::Display for ReclaimReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimEvent {
    /// The process the event is about
    pub pid: Pid,

    /// The process that caused it (extension binds, data abilities)
    #[serde(default)]
    pub caller_pid: Option<Pid>,

    #[serde(default)]
    pub caller_uid: Option<Uid>,

    /// Uid owning `pid`
    pub target_uid: Uid,

    #[serde(default)]
    pub bundle_name: String,

    pub reason: ReclaimReason,
}

impl ReclaimEvent {
    pub fn new(pid: Pid, target_uid: Uid, bundle_name: impl Into<String>, reason: ReclaimReason) -> Self {
        Self {
            pid,
            caller_pid: None,
            caller_uid: None,
            target_uid,
            bundle_name: bundle_name.into(),
            reason,
        }
    }

    /// Attach the process that triggered this event.
    pub fn with_caller(mut self, caller_pid: Pid, caller_uid: Uid) -> Self {
        self.caller_pid = Some(caller_pid);
        self.caller_uid = Some(caller_uid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_wire_names_match_display() {
        let json = serde_json::to_string(&ReclaimReason::SuspendDelayStart).unwrap();
        assert_eq!(json, "\"SUSPEND_DELAY_START\"");
        assert_eq!(ReclaimReason::UnVisible.to_string(), "UN_VISIBLE");
    }

    #[test]
    fn event_parses_without_caller_fields() {
        let line = r#"{"pid":100,"target_uid":20010001,"bundle_name":"a.b.c","reason":"CREATE_PROCESS"}"#;
        let event: ReclaimEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event, ReclaimEvent::new(100, 20010001, "a.b.c", ReclaimReason::CreateProcess));
    }

    #[test]
    fn only_boosts_arm_grace_timers() {
        assert!(ReclaimReason::AbilityStart.arms_grace_timer());
        assert!(ReclaimReason::BindExtension.arms_grace_timer());
        assert!(!ReclaimReason::UnVisible.arms_grace_timer());
        assert!(!ReclaimReason::Foreground.arms_grace_timer());
    }
}
