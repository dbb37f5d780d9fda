//! Per-reason priority rules for a single process.
//!
//! Rules act on the process's unshifted lifecycle `level`; the engine adds the
//! account shift and recomputes the bundle afterwards. A keep-alive signal
//! only ever raises importance while it is asserted. When it ends, the level
//! falls back to BACKGROUND only if it still sits exactly at the floor that
//! signal imposed, so an independent, stricter level is never disturbed.

use reclaimd_core::ReclaimReason;
use reclaimd_core::priority::{
    BACKGROUND, DIST_DEVICE, FOREGROUND, FROZEN, PERCEIVED, SUSPEND, SUSPEND_DELAY, VISIBLE,
};

use crate::model::{ExtensionBinding, Process};

/// Level an extension is held at while a caller at `caller_level` keeps it
/// bound. Both sides are unshifted levels.
pub fn extension_floor(caller_level: Option<i32>) -> i32 {
    caller_level.map_or(PERCEIVED, |level| level.max(VISIBLE))
}

/// Apply one lifecycle reason to `process`, then re-evaluate the floors.
///
/// `binding` is only consulted for [`ReclaimReason::BindExtension`].
pub fn apply(process: &mut Process, reason: ReclaimReason, binding: Option<ExtensionBinding>) {
    let flags = &mut process.flags;
    match reason {
        ReclaimReason::Foreground | ReclaimReason::AbilityStart => {
            process.level = FOREGROUND;
            flags.foreground = true;
        }
        ReclaimReason::Background => {
            process.level = BACKGROUND;
            flags.foreground = false;
        }
        ReclaimReason::ApplicationSuspend => {
            process.level = SUSPEND;
            flags.foreground = false;
        }
        ReclaimReason::Freeze => {
            process.level = FROZEN;
            flags.foreground = false;
        }
        ReclaimReason::Unfreeze => {
            if process.level == FROZEN {
                process.level = BACKGROUND;
            }
        }
        ReclaimReason::SuspendDelayStart => {
            flags.suspend_delay = true;
        }
        ReclaimReason::SuspendDelayEnd => {
            flags.suspend_delay = false;
            revert_from(process, SUSPEND_DELAY);
        }
        ReclaimReason::BackgroundRunningStart => flags.background_task = true,
        ReclaimReason::BackgroundRunningEnd => flags.background_task = false,
        ReclaimReason::EventStart => flags.short_event = true,
        ReclaimReason::EventEnd => flags.short_event = false,
        ReclaimReason::DataAbilityStart => flags.data_ability = true,
        ReclaimReason::DataAbilityEnd => flags.data_ability = false,
        ReclaimReason::Visible => flags.visible = true,
        ReclaimReason::UnVisible => {
            flags.visible = false;
            revert_from(process, VISIBLE);
        }
        ReclaimReason::DistDeviceConnected => flags.dist_device_connected = true,
        ReclaimReason::DistDeviceDisconnected => {
            flags.dist_device_connected = false;
            revert_from(process, DIST_DEVICE);
        }
        ReclaimReason::BindExtension => {
            flags.extension = binding;
        }
        ReclaimReason::UnbindExtension => {
            if let Some(old) = flags.extension.take() {
                revert_from(process, old.floor);
            }
        }
        // Structural reasons are handled by the engine itself.
        ReclaimReason::CreateProcess
        | ReclaimReason::ProcessReady
        | ReclaimReason::ProcessTerminated
        | ReclaimReason::OsAccountChanged => {}
    }

    apply_floors(process);
}

/// The reason that undoes a grace-armed boost when its timer fires.
pub fn grace_revert(boost: ReclaimReason) -> Option<ReclaimReason> {
    match boost {
        ReclaimReason::AbilityStart => Some(ReclaimReason::Background),
        ReclaimReason::Visible => Some(ReclaimReason::UnVisible),
        ReclaimReason::DistDeviceConnected => Some(ReclaimReason::DistDeviceDisconnected),
        ReclaimReason::BindExtension => Some(ReclaimReason::UnbindExtension),
        _ => None,
    }
}

fn revert_from(process: &mut Process, floor: i32) {
    if process.level == floor {
        process.level = BACKGROUND;
    }
}

fn raise_to(process: &mut Process, floor: i32) {
    if process.level > floor {
        process.level = floor;
    }
}

/// Floors evaluated after every event on an existing process.
fn apply_floors(process: &mut Process) {
    if process.flags.perceived() {
        raise_to(process, PERCEIVED);
    } else if process.level == PERCEIVED {
        process.level = BACKGROUND;
    }

    if process.flags.suspend_delay {
        raise_to(process, SUSPEND_DELAY);
    }
    if process.flags.visible {
        raise_to(process, VISIBLE);
    }
    if process.flags.dist_device_connected {
        raise_to(process, DIST_DEVICE);
    }
    if let Some(binding) = process.flags.extension {
        raise_to(process, binding.floor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn background() -> Process {
        let mut p = Process::new(1, 20010001, FOREGROUND);
        apply(&mut p, ReclaimReason::Background, None);
        p
    }

    #[test]
    fn suspend_delay_raises_and_reverts() {
        let mut p = background();
        apply(&mut p, ReclaimReason::SuspendDelayStart, None);
        assert_eq!(p.level, SUSPEND_DELAY);
        apply(&mut p, ReclaimReason::SuspendDelayEnd, None);
        assert_eq!(p.level, BACKGROUND);
    }

    #[test]
    fn suspend_delay_never_lowers_importance() {
        let mut p = Process::new(1, 20010001, FOREGROUND);
        apply(&mut p, ReclaimReason::SuspendDelayStart, None);
        assert_eq!(p.level, FOREGROUND);
        apply(&mut p, ReclaimReason::SuspendDelayEnd, None);
        assert_eq!(p.level, FOREGROUND);
    }

    #[test]
    fn suspend_delay_end_without_start_is_noop() {
        let mut p = background();
        apply(&mut p, ReclaimReason::SuspendDelayEnd, None);
        assert_eq!(p.level, BACKGROUND);
        apply(&mut p, ReclaimReason::SuspendDelayEnd, None);
        assert_eq!(p.level, BACKGROUND);
        assert!(!p.flags.suspend_delay);
    }

    #[test]
    fn perceived_floor_held_until_all_signals_end() {
        let mut p = background();
        apply(&mut p, ReclaimReason::BackgroundRunningStart, None);
        apply(&mut p, ReclaimReason::EventStart, None);
        assert_eq!(p.level, PERCEIVED);

        apply(&mut p, ReclaimReason::BackgroundRunningEnd, None);
        assert_eq!(p.level, PERCEIVED);

        apply(&mut p, ReclaimReason::EventEnd, None);
        assert_eq!(p.level, BACKGROUND);
    }

    #[test]
    fn perceived_floor_does_not_demote_foreground() {
        let mut p = Process::new(1, 20010001, FOREGROUND);
        apply(&mut p, ReclaimReason::DataAbilityStart, None);
        assert_eq!(p.level, FOREGROUND);
        apply(&mut p, ReclaimReason::DataAbilityEnd, None);
        assert_eq!(p.level, FOREGROUND);
    }

    #[test]
    fn suspend_is_held_by_active_background_task() {
        let mut p = background();
        apply(&mut p, ReclaimReason::BackgroundRunningStart, None);
        apply(&mut p, ReclaimReason::ApplicationSuspend, None);
        assert_eq!(p.level, PERCEIVED);
    }

    #[test]
    fn dist_device_floor() {
        let mut p = background();
        apply(&mut p, ReclaimReason::DistDeviceConnected, None);
        assert_eq!(p.level, DIST_DEVICE);
        apply(&mut p, ReclaimReason::DistDeviceDisconnected, None);
        assert_eq!(p.level, BACKGROUND);
    }

    #[test]
    fn extension_floor_follows_caller() {
        assert_eq!(extension_floor(None), PERCEIVED);
        assert_eq!(extension_floor(Some(FOREGROUND)), VISIBLE);
        assert_eq!(extension_floor(Some(BACKGROUND)), BACKGROUND);

        let mut p = background();
        let binding = ExtensionBinding {
            caller_uid: Some(20010002),
            floor: extension_floor(Some(FOREGROUND)),
        };
        apply(&mut p, ReclaimReason::BindExtension, Some(binding));
        assert_eq!(p.level, VISIBLE);
        apply(&mut p, ReclaimReason::UnbindExtension, None);
        assert_eq!(p.level, BACKGROUND);
        assert!(p.flags.extension.is_none());
    }

    #[test]
    fn unfreeze_only_thaws_frozen() {
        let mut p = Process::new(1, 20010001, FOREGROUND);
        apply(&mut p, ReclaimReason::Unfreeze, None);
        assert_eq!(p.level, FOREGROUND);
        apply(&mut p, ReclaimReason::Freeze, None);
        assert_eq!(p.level, FROZEN);
        apply(&mut p, ReclaimReason::Unfreeze, None);
        assert_eq!(p.level, BACKGROUND);
    }

    #[test]
    fn grace_reverts_map_to_end_reasons() {
        assert_eq!(grace_revert(ReclaimReason::Visible), Some(ReclaimReason::UnVisible));
        assert_eq!(grace_revert(ReclaimReason::AbilityStart), Some(ReclaimReason::Background));
        assert_eq!(grace_revert(ReclaimReason::Foreground), None);
    }
}
