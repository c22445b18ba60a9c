//! Turns a raw `COMMAND` into a typed action and decides when it runs.
use std::time::Duration;

use receiver_proto::protocol::{Action, Command, RawCommand};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dispatch {
    Immediate(Action),
    /// Run once `delay` has elapsed, regardless of what happens meanwhile.
    Deferred { action: Action, delay: Duration },
    /// Unknown action or a value of the wrong type.
    Ignored,
}

/// `now_ms` is epoch milliseconds at the moment the command was received.
/// Only PLAY honours a future `startAt`; everything else runs immediately.
pub fn interpret(raw: &RawCommand, now_ms: i64) -> Dispatch {
    let Some(command) = Command::decode(raw) else {
        return Dispatch::Ignored;
    };
    match (command.action, command.start_at) {
        (Action::Play, Some(start_at)) if start_at > now_ms => Dispatch::Deferred {
            action: Action::Play,
            delay: Duration::from_millis((start_at - now_ms) as u64),
        },
        (action, _) => Dispatch::Immediate(action),
    }
}

/// Clamp a volume into `0.0..=1.0`.  NaN is treated as silence.
pub fn clamp_volume(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Seek target in the primary pipeline; negative seconds seek to the start,
/// targets past what a `Duration` holds saturate.
pub fn seek_target(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use receiver_proto::protocol::CommandValue;

    fn raw(action: &str, value: CommandValue, start_at: Option<i64>) -> RawCommand {
        RawCommand {
            action: action.to_string(),
            value,
            start_at,
        }
    }

    #[test]
    fn test_future_play_is_deferred() {
        let cmd = raw("PLAY", CommandValue::Absent, Some(15_000));
        assert_eq!(
            interpret(&cmd, 10_000),
            Dispatch::Deferred {
                action: Action::Play,
                delay: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn test_past_or_absent_start_runs_now() {
        assert_eq!(
            interpret(&raw("PLAY", CommandValue::Absent, Some(9_000)), 10_000),
            Dispatch::Immediate(Action::Play)
        );
        assert_eq!(
            interpret(&raw("PLAY", CommandValue::Absent, Some(10_000)), 10_000),
            Dispatch::Immediate(Action::Play)
        );
        assert_eq!(
            interpret(&raw("PLAY", CommandValue::Absent, None), 10_000),
            Dispatch::Immediate(Action::Play)
        );
    }

    #[test]
    fn test_only_play_is_deferred() {
        let cmd = raw("PAUSE", CommandValue::Absent, Some(99_000));
        assert_eq!(interpret(&cmd, 10_000), Dispatch::Immediate(Action::Pause));
        let cmd = raw("SEEK", CommandValue::Number(3.0), Some(99_000));
        assert_eq!(interpret(&cmd, 10_000), Dispatch::Immediate(Action::Seek(3.0)));
    }

    #[test]
    fn test_mistyped_and_unknown_are_ignored() {
        assert_eq!(interpret(&raw("SEEK", CommandValue::Bool(true), None), 0), Dispatch::Ignored);
        assert_eq!(interpret(&raw("SET_CAPTIONS", CommandValue::Number(1.0), None), 0), Dispatch::Ignored);
        assert_eq!(interpret(&raw("REWIND", CommandValue::Absent, None), 0), Dispatch::Ignored);
    }

    #[test]
    fn test_clamps() {
        assert_eq!(clamp_volume(-0.5), 0.0);
        assert_eq!(clamp_volume(1.7), 1.0);
        assert_eq!(clamp_volume(0.3), 0.3);
        assert_eq!(clamp_volume(f32::NAN), 0.0);
        assert_eq!(seek_target(-5.0), Duration::ZERO);
        assert_eq!(seek_target(12.5), Duration::from_millis(12_500));
        assert_eq!(seek_target(1e20), Duration::MAX);
        assert_eq!(seek_target(f64::MAX), Duration::MAX);
    }
}
