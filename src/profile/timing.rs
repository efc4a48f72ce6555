//! 运行计时：迭代次数 / 时长 / 永久
//!
//! 文本形式（命令行使用）：
//! - `once`
//! - `forever`
//! - `iterations=<n>`
//! - `duration=<timespan>`，可追加 `,deterministic`（当前动作完成后停止）
//!   或 `,deterministic*`（当前整轮迭代完成后停止）

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::types::parse_timespan;
use crate::core::VcError;

/// 时长到期时的停止粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeterminismScope {
    /// 到期立即取消正在执行的动作
    #[default]
    Immediate,
    /// 等当前动作完成后停止
    IndividualAction,
    /// 等当前整轮迭代完成后停止
    AllActions,
}

/// 动作阶段的计时策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileTiming {
    #[default]
    OneIteration,
    Iterations(u64),
    Duration {
        duration: Duration,
        determinism: DeterminismScope,
    },
    Forever,
}

impl ProfileTiming {
    pub fn duration(duration: Duration) -> Self {
        Self::Duration {
            duration,
            determinism: DeterminismScope::Immediate,
        }
    }

    /// 已完成 `completed` 轮、已运行 `elapsed` 后是否可以开始新一轮
    pub fn may_start_iteration(&self, completed: u64, elapsed: Duration) -> bool {
        match self {
            Self::OneIteration => completed < 1,
            Self::Iterations(n) => completed < *n,
            Self::Duration { duration, .. } => completed == 0 || elapsed < *duration,
            Self::Forever => true,
        }
    }

    /// 一轮迭代内部是否可以开始下一个动作
    pub fn may_start_action(&self, elapsed: Duration) -> bool {
        match self {
            Self::Duration {
                duration,
                determinism: DeterminismScope::Immediate | DeterminismScope::IndividualAction,
            } => elapsed < *duration,
            _ => true,
        }
    }

    /// 到期需强制取消在途工作的截止时间
    pub fn hard_deadline(&self) -> Option<Duration> {
        match self {
            Self::Duration {
                duration,
                determinism: DeterminismScope::Immediate,
            } => Some(*duration),
            _ => None,
        }
    }
}

impl FromStr for ProfileTiming {
    type Err = VcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || VcError::invalid_config(format!("invalid timing '{s}'"));

        match s.to_ascii_lowercase().as_str() {
            "once" | "" => return Ok(Self::OneIteration),
            "forever" => return Ok(Self::Forever),
            _ => {}
        }

        let (key, value) = s.split_once('=').ok_or_else(invalid)?;
        match key.trim().to_ascii_lowercase().as_str() {
            "iterations" => {
                let n: u64 = value.trim().parse().map_err(|_| invalid())?;
                if n == 0 {
                    return Err(invalid());
                }
                Ok(Self::Iterations(n))
            }
            "duration" | "timeout" => {
                let (span, scope) = match value.split_once(',') {
                    Some((span, scope)) => (span, Some(scope.trim().to_ascii_lowercase())),
                    None => (value, None),
                };
                let determinism = match scope.as_deref() {
                    None => DeterminismScope::Immediate,
                    Some("deterministic") => DeterminismScope::IndividualAction,
                    Some("deterministic*") => DeterminismScope::AllActions,
                    Some(_) => return Err(invalid()),
                };
                Ok(Self::Duration {
                    duration: parse_timespan(span)?,
                    determinism,
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ProfileTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneIteration => f.write_str("once"),
            Self::Iterations(n) => write!(f, "iterations={n}"),
            Self::Duration {
                duration,
                determinism,
            } => {
                write!(f, "duration={}", duration.as_secs_f64())?;
                match determinism {
                    DeterminismScope::Immediate => Ok(()),
                    DeterminismScope::IndividualAction => f.write_str(",deterministic"),
                    DeterminismScope::AllActions => f.write_str(",deterministic*"),
                }
            }
            Self::Forever => f.write_str("forever"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_limits() {
        let once = ProfileTiming::OneIteration;
        assert!(once.may_start_iteration(0, Duration::ZERO));
        assert!(!once.may_start_iteration(1, Duration::ZERO));

        let three = ProfileTiming::Iterations(3);
        assert!(three.may_start_iteration(2, Duration::from_secs(999)));
        assert!(!three.may_start_iteration(3, Duration::ZERO));
    }

    #[test]
    fn test_duration_scopes() {
        let all = ProfileTiming::Duration {
            duration: Duration::from_secs(10),
            determinism: DeterminismScope::AllActions,
        };
        assert!(all.may_start_iteration(0, Duration::from_secs(20)));
        assert!(!all.may_start_iteration(1, Duration::from_secs(20)));
        assert!(all.may_start_action(Duration::from_secs(20)));
        assert_eq!(all.hard_deadline(), None);

        let individual: ProfileTiming = "duration=10,deterministic".parse().unwrap();
        assert!(!individual.may_start_action(Duration::from_secs(11)));
        assert_eq!(individual.hard_deadline(), None);

        let immediate = ProfileTiming::duration(Duration::from_secs(10));
        assert_eq!(immediate.hard_deadline(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!("once".parse::<ProfileTiming>().unwrap(), ProfileTiming::OneIteration);
        assert_eq!("Forever".parse::<ProfileTiming>().unwrap(), ProfileTiming::Forever);
        assert_eq!(
            "iterations=4".parse::<ProfileTiming>().unwrap(),
            ProfileTiming::Iterations(4)
        );
        assert_eq!(
            "duration=00:01:00,deterministic*".parse::<ProfileTiming>().unwrap(),
            ProfileTiming::Duration {
                duration: Duration::from_secs(60),
                determinism: DeterminismScope::AllActions
            }
        );
        assert!("iterations=0".parse::<ProfileTiming>().is_err());
        assert!("duration=5,sometimes".parse::<ProfileTiming>().is_err());
    }
}
