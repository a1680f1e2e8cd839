pub mod types;
pub mod order_block_trend_following;
pub mod chart_format;
