use crate::conversion::RateBook;
use crate::error::PriceError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Family of instruments sharing sources, offsets and refresh cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
    Gold,
    Currency,
    Silver,
}

impl InstrumentClass {
    pub const ALL: [InstrumentClass; 3] = [
        InstrumentClass::Gold,
        InstrumentClass::Currency,
        InstrumentClass::Silver,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentClass::Gold => "gold",
            InstrumentClass::Currency => "currency",
            InstrumentClass::Silver => "silver",
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentClass {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gold" => Ok(InstrumentClass::Gold),
            "currency" | "currencies" => Ok(InstrumentClass::Currency),
            "silver" => Ok(InstrumentClass::Silver),
            other => Err(PriceError::InvalidClass(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Karat {
    K24,
    K22,
    K21,
    K18,
    K14,
    K12,
    Ounce,
    GoldPound,
}

impl Karat {
    pub const ALL: [Karat; 8] = [
        Karat::K24,
        Karat::K22,
        Karat::K21,
        Karat::K18,
        Karat::K14,
        Karat::K12,
        Karat::Ounce,
        Karat::GoldPound,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Karat::K24 => "k24",
            Karat::K22 => "k22",
            Karat::K21 => "k21",
            Karat::K18 => "k18",
            Karat::K14 => "k14",
            Karat::K12 => "k12",
            Karat::Ounce => "ounce",
            Karat::GoldPound => "pound",
        }
    }
}

impl FromStr for Karat {
    type Err = PriceError;

    /// Accepts the canonical code and the aliases scraped pages use
    /// (`21`, `21k`, `K21`, `عيار 21`, `oz`, `جنيه ذهب`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let stripped = lowered.trim_start_matches("عيار").trim();
        let digits = stripped.trim_start_matches('k').trim_end_matches('k').trim();
        match digits {
            "24" => Ok(Karat::K24),
            "22" => Ok(Karat::K22),
            "21" => Ok(Karat::K21),
            "18" => Ok(Karat::K18),
            "14" => Ok(Karat::K14),
            "12" => Ok(Karat::K12),
            "ounce" | "oz" | "أونصة" | "اونصة" | "أونصة الذهب" | "اونصة الذهب" => Ok(Karat::Ounce),
            "pound" | "gold-pound" | "جنيه" | "جنيه ذهب" => Ok(Karat::GoldPound),
            _ => Err(PriceError::InvalidInstrument(format!("gold:{}", s.trim()))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SilverPurity {
    P999,
    P925,
    P900,
    P800,
    Ounce,
}

impl SilverPurity {
    pub const ALL: [SilverPurity; 5] = [
        SilverPurity::P999,
        SilverPurity::P925,
        SilverPurity::P900,
        SilverPurity::P800,
        SilverPurity::Ounce,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            SilverPurity::P999 => "999",
            SilverPurity::P925 => "925",
            SilverPurity::P900 => "900",
            SilverPurity::P800 => "800",
            SilverPurity::Ounce => "ounce",
        }
    }
}

impl FromStr for SilverPurity {
    type Err = PriceError;

    /// Accepts `925`, `s925`, `عيار 925`, `فضة عيار 925` and the ounce aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let stripped = lowered
            .trim_start_matches("فضة")
            .trim()
            .trim_start_matches("عيار")
            .trim()
            .trim_start_matches('s');
        match stripped.trim() {
            "999" => Ok(SilverPurity::P999),
            "925" => Ok(SilverPurity::P925),
            "900" => Ok(SilverPurity::P900),
            "800" => Ok(SilverPurity::P800),
            "ounce" | "oz" | "أونصة" | "اونصة" | "أونصة الفضة" | "اونصة الفضة" => {
                Ok(SilverPurity::Ounce)
            }
            _ => Err(PriceError::InvalidInstrument(format!("silver:{}", s.trim()))),
        }
    }
}

/// ISO 4217 codes quoted by the tracked banks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CurrencyCode {
    EGP,
    USD,
    EUR,
    GBP,
    SAR,
    AED,
    KWD,
    QAR,
    JOD,
    OMR,
    BHD,
    CHF,
    CAD,
    AUD,
    JPY,
    CNY,
    TRY,
}

impl CurrencyCode {
    pub const ALL: [CurrencyCode; 17] = [
        CurrencyCode::EGP,
        CurrencyCode::USD,
        CurrencyCode::EUR,
        CurrencyCode::GBP,
        CurrencyCode::SAR,
        CurrencyCode::AED,
        CurrencyCode::KWD,
        CurrencyCode::QAR,
        CurrencyCode::JOD,
        CurrencyCode::OMR,
        CurrencyCode::BHD,
        CurrencyCode::CHF,
        CurrencyCode::CAD,
        CurrencyCode::AUD,
        CurrencyCode::JPY,
        CurrencyCode::CNY,
        CurrencyCode::TRY,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            CurrencyCode::EGP => "EGP",
            CurrencyCode::USD => "USD",
            CurrencyCode::EUR => "EUR",
            CurrencyCode::GBP => "GBP",
            CurrencyCode::SAR => "SAR",
            CurrencyCode::AED => "AED",
            CurrencyCode::KWD => "KWD",
            CurrencyCode::QAR => "QAR",
            CurrencyCode::JOD => "JOD",
            CurrencyCode::OMR => "OMR",
            CurrencyCode::BHD => "BHD",
            CurrencyCode::CHF => "CHF",
            CurrencyCode::CAD => "CAD",
            CurrencyCode::AUD => "AUD",
            CurrencyCode::JPY => "JPY",
            CurrencyCode::CNY => "CNY",
            CurrencyCode::TRY => "TRY",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for CurrencyCode {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let by_name = match trimmed {
            "جنيه مصري" => Some(CurrencyCode::EGP),
            "دولار أمريكي" | "دولار امريكي" | "دولار" => Some(CurrencyCode::USD),
            "يورو" => Some(CurrencyCode::EUR),
            "جنيه استرليني" | "جنيه إسترليني" => Some(CurrencyCode::GBP),
            "ريال سعودي" => Some(CurrencyCode::SAR),
            "درهم إماراتي" | "درهم اماراتي" => Some(CurrencyCode::AED),
            "دينار كويتي" => Some(CurrencyCode::KWD),
            "ريال قطري" => Some(CurrencyCode::QAR),
            "دينار أردني" | "دينار اردني" => Some(CurrencyCode::JOD),
            "ريال عماني" => Some(CurrencyCode::OMR),
            "دينار بحريني" => Some(CurrencyCode::BHD),
            "فرنك سويسري" => Some(CurrencyCode::CHF),
            "دولار كندي" => Some(CurrencyCode::CAD),
            "دولار أسترالي" | "دولار استرالي" => Some(CurrencyCode::AUD),
            "ين ياباني" => Some(CurrencyCode::JPY),
            "يوان صيني" => Some(CurrencyCode::CNY),
            "ليرة تركية" => Some(CurrencyCode::TRY),
            _ => None,
        };
        if let Some(code) = by_name {
            return Ok(code);
        }

        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PriceError::InvalidCurrency(trimmed.to_string()));
        }
        let upper = trimmed.to_ascii_uppercase();
        CurrencyCode::ALL
            .iter()
            .find(|c| c.code() == upper)
            .copied()
            .ok_or(PriceError::InvalidCurrency(upper))
    }
}

impl Serialize for CurrencyCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for CurrencyCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Canonical key of a priced entity. The text form is `class:item`,
/// e.g. `gold:k21`, `silver:925`, `currency:USD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum InstrumentKey {
    Gold(Karat),
    Currency(CurrencyCode),
    Silver(SilverPurity),
}

impl InstrumentKey {
    pub fn class(&self) -> InstrumentClass {
        match self {
            InstrumentKey::Gold(_) => InstrumentClass::Gold,
            InstrumentKey::Currency(_) => InstrumentClass::Currency,
            InstrumentKey::Silver(_) => InstrumentClass::Silver,
        }
    }

    /// Every instrument of a class, in canonical order.
    pub fn all(class: InstrumentClass) -> Vec<InstrumentKey> {
        match class {
            InstrumentClass::Gold => Karat::ALL.iter().map(|k| InstrumentKey::Gold(*k)).collect(),
            InstrumentClass::Currency => CurrencyCode::ALL
                .iter()
                .map(|c| InstrumentKey::Currency(*c))
                .collect(),
            InstrumentClass::Silver => SilverPurity::ALL
                .iter()
                .map(|p| InstrumentKey::Silver(*p))
                .collect(),
        }
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentKey::Gold(k) => write!(f, "gold:{}", k.code()),
            InstrumentKey::Currency(c) => write!(f, "currency:{}", c.code()),
            InstrumentKey::Silver(p) => write!(f, "silver:{}", p.code()),
        }
    }
}

impl FromStr for InstrumentKey {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (class, item) = s
            .split_once(':')
            .ok_or_else(|| PriceError::InvalidInstrument(s.to_string()))?;
        let class: InstrumentClass = class
            .parse()
            .map_err(|_| PriceError::InvalidInstrument(s.to_string()))?;
        match class {
            InstrumentClass::Gold => Ok(InstrumentKey::Gold(item.parse()?)),
            InstrumentClass::Currency => Ok(InstrumentKey::Currency(item.parse()?)),
            InstrumentClass::Silver => Ok(InstrumentKey::Silver(item.parse()?)),
        }
    }
}

impl From<InstrumentKey> for String {
    fn from(key: InstrumentKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for InstrumentKey {
    type Error = PriceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        SourceId(value.to_string())
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        SourceId(value)
    }
}

/// A provider of quotes for one instrument class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub instrument_class: InstrumentClass,
    pub name: String,
    pub display_name: String,
    pub enabled: bool,
    /// Lower is more trusted
    pub priority: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

/// One source's buy/sell observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub source_id: SourceId,
    pub instrument: InstrumentKey,
    pub buy: Decimal,
    pub sell: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// `FOREIGN/BASE`, e.g. `USD/EGP`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CurrencyPair {
    pub foreign: CurrencyCode,
    pub base: CurrencyCode,
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.foreign, self.base)
    }
}

impl FromStr for CurrencyPair {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (foreign, base) = s
            .split_once('/')
            .ok_or_else(|| PriceError::InvalidCurrency(s.to_string()))?;
        Ok(CurrencyPair {
            foreign: foreign.parse()?,
            base: base.parse()?,
        })
    }
}

impl From<CurrencyPair> for String {
    fn from(pair: CurrencyPair) -> Self {
        pair.to_string()
    }
}

impl TryFrom<String> for CurrencyPair {
    type Error = PriceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A bank's quote for a currency against the base currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankRate {
    pub bank_name: SourceId,
    pub currency_pair: CurrencyPair,
    pub buy: Decimal,
    pub sell: Decimal,
    pub observed_at: DateTime<Utc>,
}

const MANUAL: &str = "manual";
const MARKET_AVERAGE: &str = "market-average";
const PRIORITY: &str = "priority";

/// Names reserved by [`ActiveSource`] and [`BankSelector`]; no source may use them.
pub const RESERVED_SOURCE_IDS: [&str; 3] = [MANUAL, MARKET_AVERAGE, PRIORITY];

/// What produced a resolved price
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ActiveSource {
    Source(SourceId),
    Manual,
    MarketAverage,
}

impl fmt::Display for ActiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveSource::Source(id) => write!(f, "{id}"),
            ActiveSource::Manual => f.write_str(MANUAL),
            ActiveSource::MarketAverage => f.write_str(MARKET_AVERAGE),
        }
    }
}

impl From<ActiveSource> for String {
    fn from(source: ActiveSource) -> Self {
        source.to_string()
    }
}

impl From<String> for ActiveSource {
    fn from(value: String) -> Self {
        match value.as_str() {
            MANUAL => ActiveSource::Manual,
            MARKET_AVERAGE => ActiveSource::MarketAverage,
            _ => ActiveSource::Source(SourceId(value)),
        }
    }
}

/// Which bank quotes feed a currency rate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum BankSelector {
    MarketAverage,
    Bank(SourceId),
}

impl fmt::Display for BankSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankSelector::MarketAverage => f.write_str(MARKET_AVERAGE),
            BankSelector::Bank(id) => write!(f, "{id}"),
        }
    }
}

impl From<BankSelector> for String {
    fn from(selector: BankSelector) -> Self {
        selector.to_string()
    }
}

impl From<String> for BankSelector {
    fn from(value: String) -> Self {
        if value == MARKET_AVERAGE {
            BankSelector::MarketAverage
        } else {
            BankSelector::Bank(SourceId(value))
        }
    }
}

/// How `currency:*` instruments are resolved in snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum CurrencyResolution {
    /// Generic priority walk, same as gold and silver
    Priority,
    Selector(BankSelector),
}

impl Default for CurrencyResolution {
    fn default() -> Self {
        CurrencyResolution::Selector(BankSelector::MarketAverage)
    }
}

impl From<CurrencyResolution> for String {
    fn from(mode: CurrencyResolution) -> Self {
        match mode {
            CurrencyResolution::Priority => PRIORITY.to_string(),
            CurrencyResolution::Selector(selector) => selector.to_string(),
        }
    }
}

impl From<String> for CurrencyResolution {
    fn from(value: String) -> Self {
        if value == PRIORITY {
            CurrencyResolution::Priority
        } else {
            CurrencyResolution::Selector(BankSelector::from(value))
        }
    }
}

/// Authoritative price of one instrument. All numeric fields are `None`
/// when no usable data exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub instrument: InstrumentKey,
    /// Sell leg, the price a customer pays
    pub price: Option<Decimal>,
    pub buy: Option<Decimal>,
    pub sell: Option<Decimal>,
    pub active_source: Option<ActiveSource>,
    pub observed_at: Option<DateTime<Utc>>,
}

impl ResolvedPrice {
    pub fn unknown(instrument: InstrumentKey) -> Self {
        Self {
            instrument,
            price: None,
            buy: None,
            sell: None,
            active_source: None,
            observed_at: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.price.is_some()
    }
}

/// Immutable, point-in-time view of every tracked instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub instruments: BTreeMap<InstrumentKey, ResolvedPrice>,
    pub rate_book: RateBook,
}

impl Snapshot {
    pub fn get(&self, instrument: &InstrumentKey) -> Option<&ResolvedPrice> {
        self.instruments.get(instrument)
    }

    pub fn price_of(&self, instrument: &InstrumentKey) -> Option<Decimal> {
        self.get(instrument).and_then(|p| p.price)
    }
}
