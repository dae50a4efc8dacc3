//! 设备告警评估与通知分发引擎
//!
//! 指标样本经阈值评估、分类后进入按租户的调度策略（免打扰、批量、限流、去重），
//! 由分发器并行发送到各渠道；未确认的告警按重复间隔升级，直至确认或过期。

pub mod classifier;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod evaluator;
pub mod model;
pub mod policy;
pub mod service;
pub mod settings;
pub mod store;
pub mod validator;

pub use classifier::{category_for, classify, classify_external, ExternalAlert};
pub use dispatcher::{render, DispatchReport, Dispatcher};
pub use engine::{
    AlertEngine, EngineConfig, DEFAULT_HISTORY_RETENTION_HOURS, DEFAULT_MAX_DISPATCH_COUNT,
    DEFAULT_MAX_HISTORY,
};
pub use error::{AlertError, Result};
pub use escalation::{EscalationMonitor, SweepOutcome};
pub use evaluator::{evaluate, Comparison};
pub use model::{
    Alert, AlertCandidate, AlertCategory, AlertState, AuditEvent, DispatchOutcome,
    DispatchRecord, MetricKind, MetricSample, Priority, SuppressReason, ThresholdKey,
};
pub use policy::{Decision, EffectivePolicy, PolicyState};
pub use service::{start, EngineTaskHandle, SampleSender, ServiceConfig, TenantSample};
pub use settings::{
    default_priority, FrequencyPatch, FrequencyPolicy, NotificationSettings, ScheduleMode,
    SettingsPatch, SettingsProvider, Thresholds,
};
pub use store::AlertStore;
pub use validator::{SettingsValidator, ValidationError, ValidationErrors, ValidationRule};
