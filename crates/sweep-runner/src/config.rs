use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest event count every coder strategy handles.
pub const MAX_EVENTS: u64 = 991_683;

pub const DEFAULT_AVG_PERSON_BYTE_SIZE: u32 = 200;
pub const DEFAULT_AVG_AUCTION_BYTE_SIZE: u32 = 500;
pub const DEFAULT_AVG_BID_BYTE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Query {
    Passthrough,
    CurrencyConversion,
    Selection,
    LocalItemSuggestion,
    AveragePriceForCategory,
    HotItems,
    AverageSellingPriceBySeller,
    HighestBid,
    MonitorNewUsers,
    WinningBids,
    LogToShardedFiles,
    UserSessions,
    ProcessingTimeWindows,
    BoundedSideInputJoin,
    SessionSideInputJoin,
}

impl Query {
    /// Every query the sweeps exercise. `LOG_TO_SHARDED_FILES` needs a sink
    /// the local runner does not provide.
    pub const ALL: [Query; 14] = [
        Query::Passthrough,
        Query::CurrencyConversion,
        Query::Selection,
        Query::LocalItemSuggestion,
        Query::AveragePriceForCategory,
        Query::HotItems,
        Query::AverageSellingPriceBySeller,
        Query::HighestBid,
        Query::MonitorNewUsers,
        Query::WinningBids,
        Query::UserSessions,
        Query::ProcessingTimeWindows,
        Query::BoundedSideInputJoin,
        Query::SessionSideInputJoin,
    ];

    /// Queries that finish in a reasonable time.
    pub const NORMAL: [Query; 12] = [
        Query::Passthrough,
        Query::CurrencyConversion,
        Query::Selection,
        Query::LocalItemSuggestion,
        Query::AveragePriceForCategory,
        Query::HotItems,
        Query::AverageSellingPriceBySeller,
        Query::MonitorNewUsers,
        Query::WinningBids,
        Query::UserSessions,
        Query::ProcessingTimeWindows,
        Query::SessionSideInputJoin,
    ];

    pub const FAST: [Query; 5] = [
        Query::Passthrough,
        Query::CurrencyConversion,
        Query::Selection,
        Query::LocalItemSuggestion,
        Query::MonitorNewUsers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Query::Passthrough => "PASSTHROUGH",
            Query::CurrencyConversion => "CURRENCY_CONVERSION",
            Query::Selection => "SELECTION",
            Query::LocalItemSuggestion => "LOCAL_ITEM_SUGGESTION",
            Query::AveragePriceForCategory => "AVERAGE_PRICE_FOR_CATEGORY",
            Query::HotItems => "HOT_ITEMS",
            Query::AverageSellingPriceBySeller => "AVERAGE_SELLING_PRICE_BY_SELLER",
            Query::HighestBid => "HIGHEST_BID",
            Query::MonitorNewUsers => "MONITOR_NEW_USERS",
            Query::WinningBids => "WINNING_BIDS",
            Query::LogToShardedFiles => "LOG_TO_SHARDED_FILES",
            Query::UserSessions => "USER_SESSIONS",
            Query::ProcessingTimeWindows => "PROCESSING_TIME_WINDOWS",
            Query::BoundedSideInputJoin => "BOUNDED_SIDE_INPUT_JOIN",
            Query::SessionSideInputJoin => "SESSION_SIDE_INPUT_JOIN",
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Query {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Query::ALL
            .iter()
            .chain(std::iter::once(&Query::LogToShardedFiles))
            .find(|q| q.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown query: {}", s))
    }
}

/// One concrete benchmark invocation.
///
/// Optional fields are overrides: `None` leaves the job's own default in
/// force rather than meaning zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub flink_master: String,
    pub query: Query,
    pub parallelism: u32,
    pub coder_strategy: String,
    pub num_events: Option<u64>,
    pub num_event_generators: Option<u32>,
    pub avg_person_byte_size: Option<u32>,
    pub avg_auction_byte_size: Option<u32>,
    pub avg_bid_byte_size: Option<u32>,
    pub faster_copy: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            flink_master: "[local]".to_string(),
            query: Query::Passthrough,
            parallelism: 1,
            coder_strategy: String::new(),
            num_events: None,
            num_event_generators: None,
            avg_person_byte_size: None,
            avg_auction_byte_size: None,
            avg_bid_byte_size: None,
            faster_copy: false,
        }
    }
}
