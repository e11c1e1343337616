pub mod alarm;
pub mod engine;

pub use alarm::{AlarmController, AlarmSurface, AlertNotification, LogAlarmSurface, NotificationAction};
pub use engine::{AlertAction, AlertEngine, AlertState, EnginePolicy, Transition};
