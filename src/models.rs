//! Core data models for the strategy orchestration engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusinessStage {
    Intro,
    ElementCollection,
    StrategyGeneration,
    ReviewFeedback,
    SaveOrExit,
    ReturningUser,
}

impl BusinessStage {
    pub fn label(&self) -> &'static str {
        match self {
            BusinessStage::Intro => "开场介绍",
            BusinessStage::ElementCollection => "要素收集",
            BusinessStage::StrategyGeneration => "策略生成",
            BusinessStage::ReviewFeedback => "策略评审",
            BusinessStage::SaveOrExit => "保存退出",
            BusinessStage::ReturningUser => "老用户回访",
        }
    }
}

impl fmt::Display for BusinessStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Conservative,
    Moderate,
    Active,
    Aggressive,
}

impl RiskTolerance {
    /// Accepts the Chinese labels used in conversation and their English names.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "保守" | "conservative" => Some(RiskTolerance::Conservative),
            "稳健" | "moderate" => Some(RiskTolerance::Moderate),
            "积极" | "active" => Some(RiskTolerance::Active),
            "激进" | "aggressive" => Some(RiskTolerance::Aggressive),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskTolerance::Conservative => "保守",
            RiskTolerance::Moderate => "稳健",
            RiskTolerance::Active => "积极",
            RiskTolerance::Aggressive => "激进",
        }
    }

    /// Target annualized volatility band (low, high)
    pub fn volatility_band(&self) -> (f64, f64) {
        match self {
            RiskTolerance::Conservative => (0.0, 0.08),
            RiskTolerance::Moderate => (0.05, 0.15),
            RiskTolerance::Active => (0.10, 0.22),
            RiskTolerance::Aggressive => (0.15, 0.35),
        }
    }

    pub fn requires_diversification(&self) -> bool {
        !matches!(self, RiskTolerance::Conservative)
    }

    /// One notch towards conservative
    pub fn lower(&self) -> Self {
        match self {
            RiskTolerance::Conservative | RiskTolerance::Moderate => RiskTolerance::Conservative,
            RiskTolerance::Active => RiskTolerance::Moderate,
            RiskTolerance::Aggressive => RiskTolerance::Active,
        }
    }

    /// One notch towards aggressive
    pub fn raise(&self) -> Self {
        match self {
            RiskTolerance::Conservative => RiskTolerance::Moderate,
            RiskTolerance::Moderate => RiskTolerance::Active,
            RiskTolerance::Active | RiskTolerance::Aggressive => RiskTolerance::Aggressive,
        }
    }
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn rank(&self) -> u8 {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 1,
            RiskLevel::High => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "低",
            RiskLevel::Medium => "中",
            RiskLevel::High => "高",
        }
    }
}

impl PartialOrd for RiskLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RiskLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    /// Supplied by the upstream data source
    Observed,
    /// Inferred by rule from other observed fields
    Derived,
    /// Statistically estimated from price history
    Estimated,
}

//
// ================= Investment Elements =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ElementField {
    RiskTolerance,
    TargetReturn,
    Amount,
    Horizon,
    PreferredAssetClasses,
    ForbiddenAssets,
    MaxDrawdown,
}

impl ElementField {
    pub fn label(&self) -> &'static str {
        match self {
            ElementField::RiskTolerance => "风险偏好",
            ElementField::TargetReturn => "目标收益",
            ElementField::Amount => "投资金额",
            ElementField::Horizon => "投资期限",
            ElementField::PreferredAssetClasses => "偏好资产",
            ElementField::ForbiddenAssets => "排除资产",
            ElementField::MaxDrawdown => "最大回撤",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ElementValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl ElementValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ElementValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ElementValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> &[String] {
        match self {
            ElementValue::List(items) => items,
            _ => &[],
        }
    }
}

impl fmt::Display for ElementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementValue::Number(n) => write!(f, "{}", n),
            ElementValue::Text(s) => write!(f, "{}", s),
            ElementValue::List(items) => write!(f, "{}", items.join("、")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestmentElement {
    pub field: ElementField,
    pub value: ElementValue,
    pub confidence: f64,
    pub source_turn: u32,
}

impl InvestmentElement {
    pub fn new(field: ElementField, value: ElementValue, confidence: f64, source_turn: u32) -> Self {
        Self {
            field,
            value,
            confidence: confidence.clamp(0.0, 1.0),
            source_turn,
        }
    }
}

/// Weaker observations kept per field
pub const MAX_COMPETING_PER_FIELD: usize = 5;

/// Elements collected over a conversation.
///
/// A field is only ever replaced by an observation of equal or higher
/// confidence; the latest weaker observations are retained in `competing`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedElements {
    pub elements: BTreeMap<ElementField, InvestmentElement>,
    #[serde(default)]
    pub competing: Vec<InvestmentElement>,
}

impl ExtractedElements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one observation. Returns true when it became the field's value.
    pub fn merge(&mut self, mut element: InvestmentElement) -> bool {
        element.confidence = element.confidence.clamp(0.0, 1.0);

        match self.elements.get(&element.field) {
            Some(existing) if element.confidence < existing.confidence => {
                let field = element.field;
                self.competing.push(element);
                let held = self.competing.iter().filter(|e| e.field == field).count();
                if held > MAX_COMPETING_PER_FIELD {
                    if let Some(oldest) = self.competing.iter().position(|e| e.field == field) {
                        self.competing.remove(oldest);
                    }
                }
                false
            }
            _ => {
                self.elements.insert(element.field, element);
                true
            }
        }
    }

    pub fn merge_all(&mut self, elements: impl IntoIterator<Item = InvestmentElement>) -> usize {
        elements.into_iter().filter(|e| self.merge(e.clone())).count()
    }

    pub fn get(&self, field: ElementField) -> Option<&InvestmentElement> {
        self.elements.get(&field)
    }

    pub fn confidence(&self, field: ElementField) -> f64 {
        self.get(field).map(|e| e.confidence).unwrap_or(0.0)
    }

    pub fn risk_tolerance(&self) -> Option<RiskTolerance> {
        self.get(ElementField::RiskTolerance)
            .and_then(|e| e.value.as_text())
            .and_then(RiskTolerance::from_label)
    }

    pub fn preferred_asset_classes(&self) -> Vec<String> {
        self.list(ElementField::PreferredAssetClasses)
    }

    pub fn forbidden_assets(&self) -> Vec<String> {
        self.list(ElementField::ForbiddenAssets)
    }

    pub fn amount(&self) -> Option<f64> {
        self.get(ElementField::Amount).and_then(|e| e.value.as_number())
    }

    pub fn target_return(&self) -> Option<f64> {
        self.get(ElementField::TargetReturn).and_then(|e| e.value.as_number())
    }

    pub fn max_drawdown(&self) -> Option<f64> {
        self.get(ElementField::MaxDrawdown).and_then(|e| e.value.as_number())
    }

    pub fn horizon(&self) -> Option<&str> {
        self.get(ElementField::Horizon).and_then(|e| e.value.as_text())
    }

    fn list(&self, field: ElementField) -> Vec<String> {
        self.get(field)
            .map(|e| e.value.as_list().to_vec())
            .unwrap_or_default()
    }

    /// Gating elements for strategy generation that are absent or below `gate`.
    pub fn missing_required(&self, gate: f64) -> Vec<ElementField> {
        let mut missing = Vec::new();

        if self.risk_tolerance().is_none() || self.confidence(ElementField::RiskTolerance) < gate {
            missing.push(ElementField::RiskTolerance);
        }
        if self.preferred_asset_classes().is_empty()
            || self.confidence(ElementField::PreferredAssetClasses) < gate
        {
            missing.push(ElementField::PreferredAssetClasses);
        }

        missing
    }

    /// Flat field → value view used as strategy generation context
    pub fn summary(&self) -> BTreeMap<String, String> {
        self.elements
            .values()
            .map(|e| (e.field.label().to_string(), e.value.to_string()))
            .collect()
    }
}

//
// ================= Session =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stage: BusinessStage,
    pub elements: ExtractedElements,
    pub current_strategy: Option<Strategy>,
    pub turn_count: u32,
    /// Consecutive optimization requests without saving
    #[serde(default)]
    pub rejection_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(id: Uuid, user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            stage: BusinessStage::Intro,
            elements: ExtractedElements::new(),
            current_strategy: None,
            turn_count: 0,
            rejection_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

//
// ================= Market Data =================
//

/// ETF record as received from the data provider; any field may be missing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EtfRecord {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub benchmark: Option<String>,
    #[serde(default)]
    pub pe: Option<f64>,
    #[serde(default)]
    pub pb: Option<f64>,
    #[serde(default)]
    pub asset_class: Option<String>,
    /// Fund scale, used as the index weight proxy
    #[serde(default)]
    pub aum: Option<f64>,
}

impl EtfRecord {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tagged<T> {
    pub value: T,
    pub confidence_level: ConfidenceLevel,
}

impl<T> Tagged<T> {
    pub fn observed(value: T) -> Self {
        Self { value, confidence_level: ConfidenceLevel::Observed }
    }

    pub fn derived(value: T) -> Self {
        Self { value, confidence_level: ConfidenceLevel::Derived }
    }

    pub fn estimated(value: T) -> Self {
        Self { value, confidence_level: ConfidenceLevel::Estimated }
    }
}

/// Raw record plus derived signals. The raw record is carried untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedEtfRecord {
    pub record: EtfRecord,
    pub category: Tagged<String>,
    pub sub_category: Tagged<String>,
    pub objective: Tagged<String>,
    pub asset_class: Tagged<String>,
    pub theme: Option<String>,
    pub region: String,
    pub risk_level: RiskLevel,
    pub pe: Option<Tagged<f64>>,
    pub pb: Option<Tagged<f64>>,
    /// Annualized volatility of log returns, when price history was available
    pub volatility: Option<f64>,
    pub price_percentile: Option<f64>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl EnrichedEtfRecord {
    pub fn code(&self) -> &str {
        &self.record.code
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Price series per ETF code, each sorted by date
pub type PriceBook = BTreeMap<String, Vec<PricePoint>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` calendar days ending today
    pub fn trailing_days(days: i64) -> Self {
        let end = Utc::now().date_naive();
        Self {
            start: end - chrono::Duration::days(days),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl NewsItem {
    pub fn full_text(&self) -> String {
        format!("{} {}", self.title, self.content)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UniverseFilter {
    #[serde(default)]
    pub codes: Vec<String>,
    #[serde(default)]
    pub asset_classes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewsFilter {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Virtual sector built from ETFs sharing a derived category.
/// Recomputed per request; never a source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectorAggregate {
    pub virtual_sector_id: String,
    pub name: String,
    pub constituents: BTreeSet<String>,
    pub index_value: f64,
    /// Weighted day-over-day change, percent
    pub change_rate: f64,
    pub total_aum: f64,
    pub as_of: NaiveDate,
}

//
// ================= Strategy =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyStatus {
    Draft,
    Generated,
    Backtested,
    Optimizing,
    Saved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub etf_code: String,
    pub etf_name: String,
    pub weight: f64,
    pub asset_class: String,
    pub category: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationContext {
    /// Elements that drove generation, by label
    pub drivers: BTreeMap<String, String>,
    #[serde(default)]
    pub notes: Vec<String>,
    /// Explanation of what changed relative to the previous version
    #[serde(default)]
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceEstimate {
    pub expected_return: f64,
    pub expected_volatility: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Strategy {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub allocations: Vec<Allocation>,
    pub risk_level: RiskTolerance,
    pub status: StrategyStatus,
    pub generation_context: GenerationContext,
    pub performance_estimate: PerformanceEstimate,
    #[serde(default)]
    pub backtest_result: Option<BacktestResult>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

impl Strategy {
    pub fn total_weight(&self) -> f64 {
        self.allocations.iter().map(|a| a.weight).sum()
    }

    pub fn max_weight(&self) -> f64 {
        self.allocations.iter().map(|a| a.weight).fold(0.0, f64::max)
    }

    pub fn codes(&self) -> Vec<String> {
        self.allocations.iter().map(|a| a.etf_code.clone()).collect()
    }

    pub fn is_backtested(&self) -> bool {
        matches!(self.status, StrategyStatus::Backtested | StrategyStatus::Saved)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BacktestPoint {
    pub date: NaiveDate,
    pub portfolio_value: f64,
    pub daily_return: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BacktestSummary {
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    /// None when volatility is zero
    pub sharpe_ratio: Option<f64>,
    pub win_rate: f64,
    pub trading_days: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestResult {
    pub period: DateRange,
    pub initial_capital: f64,
    pub series: Vec<BacktestPoint>,
    pub summary: BacktestSummary,
    /// Holdings left out for lack of price history
    #[serde(default)]
    pub excluded: Vec<String>,
}

//
// ================= Safety =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    InvestmentAdvice,
    StrategyRecommendation,
    MarketAnalysis,
    BacktestResults,
    General,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    GuaranteedReturn,
    Misleading,
    AbsoluteStatement,
    MissingRiskWarning,
    ProhibitedRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub category: ViolationCategory,
    pub severity: RiskLevel,
    pub matched_text: String,
    /// Char offset of the match, when it has one
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetyReview {
    pub content_hash: String,
    pub content_type: ContentType,
    pub violations: Vec<Violation>,
    pub risk_level: RiskLevel,
    pub processed_content: String,
    pub safe: bool,
    pub blocked: bool,
    pub rewritten: bool,
    pub reviewed_at: DateTime<Utc>,
}

//
// ================= Plan & Execution =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DataFetch,
    Derivation,
    Generation,
    Backtest,
    Optimization,
    SafetyCheck,
}

impl Capability {
    /// Position in the fixed pipeline order
    pub fn rank(&self) -> u8 {
        match self {
            Capability::DataFetch => 0,
            Capability::Derivation => 1,
            Capability::Generation => 2,
            Capability::Backtest => 3,
            Capability::Optimization => 4,
            Capability::SafetyCheck => 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    pub order: u32,
    pub tool_name: String,
    pub capability: Capability,
    pub dependencies: Vec<u32>,
    /// Optional steps degrade instead of halting the plan
    pub optional: bool,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub session_id: Uuid,
    pub stage: BusinessStage,
    pub steps: Vec<PlanStep>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub observation_id: Uuid,
    pub plan_id: Uuid,
    pub step_order: u32,
    pub tool_name: String,
    pub inputs_hash: String,
    pub status: ExecutionStatus,
    pub attempts: u32,
    pub execution_time_ms: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

//
// ================= Status =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Thinking,
    FetchingData,
    Deriving,
    GeneratingStrategy,
    Backtesting,
    Optimizing,
    ReviewingSafety,
    Completed,
    Failed,
    Cancelled,
}

impl From<Capability> for StatusKind {
    fn from(capability: Capability) -> Self {
        match capability {
            Capability::DataFetch => StatusKind::FetchingData,
            Capability::Derivation => StatusKind::Deriving,
            Capability::Generation => StatusKind::GeneratingStrategy,
            Capability::Backtest => StatusKind::Backtesting,
            Capability::Optimization => StatusKind::Optimizing,
            Capability::SafetyCheck => StatusKind::ReviewingSafety,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEvent {
    pub kind: StatusKind,
    pub message: String,
    pub tool_name: Option<String>,
    pub step: Option<u32>,
    pub total_steps: Option<u32>,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tool_name: None,
            step: None,
            total_steps: None,
            at: Utc::now(),
        }
    }
}

//
// ================= Turn Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageProgress {
    pub stage: BusinessStage,
    pub description: String,
    pub completion_pct: u8,
    pub missing_elements: Vec<String>,
    pub next_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReply {
    pub session_id: Uuid,
    pub reply: String,
    pub strategy_updated: bool,
    pub strategy: Option<Strategy>,
    pub stage: BusinessStage,
    pub progress: StageProgress,
    pub safety: Option<SafetyReview>,
    /// Set when the turn failed and may simply be resent
    pub retry_available: bool,
    pub audit_id: Option<Uuid>,
}

//
// ================= Audit Record =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub audit_id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub user_message: String,
    pub inputs_hash: String,
    pub stage_before: BusinessStage,
    pub stage_after: BusinessStage,
    pub plans: Vec<Plan>,
    pub observations: Vec<Observation>,
    pub safety_review: Option<SafetyReview>,
    pub reply: String,
    pub reasoning_trace: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}
