pub mod bybit;
pub mod market_data;
pub mod news_evaluator;
